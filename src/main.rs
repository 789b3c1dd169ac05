//! Arnoldii CLI
//!
//! Runs the Discord bot, the idle-channel sweep and the health endpoint.

use arnoldii::memory::IdleSweep;
use arnoldii::{discord, health, BotConfig, BotStatus, ConversationMemory, KnowledgeAgent};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Arnoldii - a Discord assistant backed by DeepSeek
#[derive(Parser, Debug)]
#[command(name = "arnoldii")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the health endpoint (overrides config and PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Verbose output: debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .init();

    let mut config = BotConfig::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config = config.with_health_port(port);
    }

    info!("Starting Arnoldii");
    info!(model = %config.model, api_url = %config.api_url, "Completion backend");
    if config.api_key.is_none() {
        warn!("DEEPSEEK_API_KEY is not set; replies will report the missing key");
    }

    let memory = ConversationMemory::from_config(&config).shared();
    let agent = Arc::new(KnowledgeAgent::from_config(&config, memory.clone()));
    let status = Arc::new(BotStatus::new());
    let (ready_tx, ready_rx) = watch::channel(false);

    let health_handle = {
        let status = status.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, status).await {
                error!("Health server stopped: {}", e);
            }
        })
    };

    let sweep_handle =
        IdleSweep::new(config.idle_threshold, config.sweep_interval).spawn(memory, ready_rx);

    let result = discord::run(&config, agent, status, ready_tx).await;

    sweep_handle.abort();
    health_handle.abort();

    match result {
        Ok(()) => {
            info!("Arnoldii stopped");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            Err(e.into())
        }
    }
}

/// `RUST_LOG` wins; otherwise info, or debug with `-v`
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from(["arnoldii", "--config", "bot.toml", "--port", "9000", "-v"]);
        assert_eq!(cli.config, Some(PathBuf::from("bot.toml")));
        assert_eq!(cli.port, Some(9000));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["arnoldii"]);
        assert!(cli.config.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.verbose);
    }
}
