//! Arnoldii - a Discord assistant backed by the DeepSeek chat API
//!
//! The bot relays channel messages to the completion API and keeps a short,
//! bounded conversation memory per channel:
//! - A ring buffer of recent turns per channel
//! - Least-recently-used eviction once too many channels are tracked
//! - A periodic sweep that forgets idle channels
//! - Chunked, paced delivery of long replies

pub mod commands;
pub mod config;
pub mod discord;
pub mod health;
pub mod knowledge;
pub mod memory;

pub use config::BotConfig;
pub use health::BotStatus;
pub use knowledge::{CompletionClient, CompletionError, KnowledgeAgent, ResponseDelivery};
pub use memory::{ConversationMemory, HistoryStore, PromptFormatter, SharedMemory};

/// Result type for Arnoldii operations
pub type Result<T> = std::result::Result<T, ArnoldiiError>;

/// Errors that can occur while configuring or running the bot
#[derive(Debug, thiserror::Error)]
pub enum ArnoldiiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Discord error: {0}")]
    Discord(String),

    #[error("Health server error: {0}")]
    Health(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
