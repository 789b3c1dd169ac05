//! Bot configuration
//!
//! Resolution order (later wins):
//!   1. built-in defaults
//!   2. `config.toml` (explicit path, or `<config_dir>/arnoldii/config.toml`)
//!   3. environment variables (a `.env` file is loaded first when present)

use crate::memory::{MAX_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
use crate::{ArnoldiiError, Result};
use chrono::TimeDelta;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_MAX_TURNS: usize = 5;
pub const DEFAULT_MAX_CHANNELS: usize = 10;
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_COMMAND_PREFIX: &str = "!";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Arnoldii, an advanced AI assistant developed by Astragate. \
You are helpful, friendly, and extremely knowledgeable. \
Always introduce yourself as 'Arnoldii, developed by Astragate' when meeting someone new. \
You can answer questions on a wide range of topics with accurate, up-to-date information. \
When you don't know something, admit it rather than making up information. \
Keep your responses conversational but informative.";

/// Environment variable names
pub const ENV_API_KEY: &str = "DEEPSEEK_API_KEY";
pub const ENV_DISCORD_TOKEN: &str = "DISCORD_TOKEN";
pub const ENV_PORT: &str = "PORT";
pub const ENV_API_URL: &str = "DEEPSEEK_API_URL";
pub const ENV_MODEL: &str = "DEEPSEEK_MODEL";

/// Configuration for Arnoldii
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// DeepSeek API key. Absent means every completion reports "not configured".
    pub api_key: Option<String>,

    /// Discord bot token
    pub discord_token: Option<String>,

    /// Chat completions endpoint
    pub api_url: String,

    /// Model name sent with every request
    pub model: String,

    /// Persona instruction emitted as the system message
    pub system_prompt: String,

    /// Turns kept per channel
    pub max_turns: usize,

    /// Channels tracked before LRU eviction kicks in
    pub max_channels: usize,

    /// Channels unused for longer than this are swept
    pub idle_threshold: Duration,

    /// How often the idle sweep runs
    pub sweep_interval: Duration,

    /// Prefix that marks a message as a command
    pub command_prefix: String,

    /// Lowercase name variants that address the bot without a mention
    pub bot_names: Vec<String>,

    /// Port for the health server
    pub health_port: u16,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            discord_token: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            max_channels: DEFAULT_MAX_CHANNELS,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            bot_names: vec!["arnoldii".to_string(), "arnold".to_string()],
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

/// On-disk `config.toml`. Every field is optional and only overrides defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    api_url: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    max_turns: Option<usize>,
    max_channels: Option<usize>,
    idle_threshold_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    command_prefix: Option<String>,
    bot_names: Option<Vec<String>>,
    health_port: Option<u16>,
}

impl BotConfig {
    /// Load the full configuration: defaults, then the TOML file, then the environment.
    ///
    /// `config_path` overrides the default file location. An explicit path that
    /// does not exist is an error; a missing default file is not.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ArnoldiiError::Config(format!(".env: {e}"))),
        }

        let mut config = Self::default();

        match config_path {
            Some(path) => config.apply_file(path)?,
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    config.apply_file(&path)?;
                }
            }
        }

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a TOML file
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArnoldiiError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let file: ConfigToml = toml::from_str(&content)?;
        info!("Loaded config file {}", path.display());

        if let Some(v) = file.api_url {
            self.api_url = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.system_prompt {
            self.system_prompt = v;
        }
        if let Some(v) = file.max_turns {
            self.max_turns = v;
        }
        if let Some(v) = file.max_channels {
            self.max_channels = v;
        }
        if let Some(v) = file.idle_threshold_secs {
            self.idle_threshold = Duration::from_secs(v);
        }
        if let Some(v) = file.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = file.command_prefix {
            self.command_prefix = v;
        }
        if let Some(v) = file.bot_names {
            self.bot_names = v.into_iter().map(|n| n.to_lowercase()).collect();
        }
        if let Some(v) = file.health_port {
            self.health_port = v;
        }
        Ok(())
    }

    /// Apply overrides from the environment. `lookup` is injectable for tests.
    /// Blank values are treated as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get(ENV_API_KEY) {
            self.api_key = Some(v);
        }
        if let Some(v) = get(ENV_DISCORD_TOKEN) {
            self.discord_token = Some(v);
        }
        if let Some(v) = get(ENV_API_URL) {
            self.api_url = v;
        }
        if let Some(v) = get(ENV_MODEL) {
            self.model = v;
        }
        if let Some(port) = get(ENV_PORT).and_then(|v| v.parse::<u16>().ok()) {
            self.health_port = port;
        }
    }

    /// Reject configurations that would break the memory invariants
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(ArnoldiiError::Config("max_turns must be at least 1".into()));
        }
        if self.max_channels == 0 {
            return Err(ArnoldiiError::Config(
                "max_channels must be at least 1".into(),
            ));
        }
        if !(MIN_SWEEP_INTERVAL..=MAX_SWEEP_INTERVAL).contains(&self.sweep_interval) {
            return Err(ArnoldiiError::Config(format!(
                "sweep_interval must be between {}s and {}s",
                MIN_SWEEP_INTERVAL.as_secs(),
                MAX_SWEEP_INTERVAL.as_secs()
            )));
        }
        if TimeDelta::from_std(self.idle_threshold).is_err() {
            return Err(ArnoldiiError::Config("idle_threshold is too large".into()));
        }
        if self.command_prefix.is_empty() {
            return Err(ArnoldiiError::Config(
                "command_prefix must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The Discord token, or a configuration error if it is missing
    pub fn require_discord_token(&self) -> Result<&str> {
        self.discord_token.as_deref().ok_or_else(|| {
            ArnoldiiError::Config(format!("{ENV_DISCORD_TOKEN} is not set"))
        })
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_channels(mut self, max_channels: usize) -> Self {
        self.max_channels = max_channels;
        self
    }

    pub fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("arnoldii").join("config.toml"))
}
