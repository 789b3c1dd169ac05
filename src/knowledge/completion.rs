//! DeepSeek chat completions client
//!
//! One non-streaming request per reply. Failures never escape as faults:
//! [`CompletionClient::try_complete`] returns a typed [`CompletionError`] and
//! [`CompletionClient::complete`] maps it to text that can go straight back
//! into the channel.

use crate::memory::ChatMessage;
use crate::BotConfig;
use chrono::{Local, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Hard bound on a completion call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Error details from the API are cut to this many characters
const ERROR_DETAIL_MAX_CHARS: usize = 500;

pub const TEMPERATURE: f64 = 0.7;
pub const MAX_TOKENS: u32 = 800;

pub const NOT_CONFIGURED_MESSAGE: &str = "Error: DeepSeek API key not configured. Please set the DEEPSEEK_API_KEY environment variable.";
pub const DEGRADED_MESSAGE: &str =
    "I encountered an error while processing your request. Please try again later.";

// ─── Usage tracking ─────────────────────────────────────────────────

/// Process-wide API usage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageCounter {
    pub total_tokens: u64,
    pub requests_today: u64,
    pub last_reset: NaiveDate,
}

impl UsageCounter {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            total_tokens: 0,
            requests_today: 0,
            last_reset: today,
        }
    }

    /// Reset the daily request count when the date has changed.
    /// Returns `true` if a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today == self.last_reset {
            return false;
        }
        self.requests_today = 0;
        self.last_reset = today;
        true
    }

    /// Count one request made on `today`
    pub fn record_request(&mut self, today: NaiveDate) {
        if self.roll_over(today) {
            info!(%today, "Daily request counter reset");
        }
        self.requests_today += 1;
    }

    /// Add reported tokens, returning the new total
    pub fn add_tokens(&mut self, tokens: u64) -> u64 {
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        self.total_tokens
    }
}

// ─── Errors ─────────────────────────────────────────────────────────

/// Why a completion produced no text
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("DeepSeek API key not configured")]
    NotConfigured,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Transport(String),

    #[error("API error {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("unexpected API response: {raw}")]
    MalformedResponse { raw: String },
}

impl CompletionError {
    /// The chat-facing text for this failure
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured => NOT_CONFIGURED_MESSAGE.to_string(),
            Self::MalformedResponse { .. } => DEGRADED_MESSAGE.to_string(),
            other => format!("I encountered an error: {other}"),
        }
    }
}

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

// ─── Client ─────────────────────────────────────────────────────────

/// Client for the chat completions endpoint, with usage tracking
pub struct CompletionClient {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    model: String,
    usage: Mutex<UsageCounter>,
}

impl CompletionClient {
    pub fn new(
        api_key: Option<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("arnoldii/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_url: api_url.into(),
            model: model.into(),
            usage: Mutex::new(UsageCounter::new(Local::now().date_naive())),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.api_url.clone(),
            config.model.clone(),
        )
    }

    /// Whether an API key is present
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Current usage figures
    pub async fn usage(&self) -> UsageCounter {
        self.usage.lock().await.clone()
    }

    /// Complete a conversation, always yielding text for the channel
    pub async fn complete(&self, messages: &[ChatMessage]) -> String {
        match self.try_complete(messages).await {
            Ok(text) => text,
            Err(e) => {
                match &e {
                    CompletionError::NotConfigured => {
                        warn!("Completion requested without an API key")
                    }
                    CompletionError::MalformedResponse { raw } => {
                        error!("Unexpected API response: {}", raw)
                    }
                    other => error!("Error calling DeepSeek API: {}", other),
                }
                e.user_message()
            }
        }
    }

    /// Complete a conversation, returning the first choice's text
    pub async fn try_complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CompletionError::NotConfigured)?;

        self.usage
            .lock()
            .await
            .record_request(Local::now().date_naive());

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream: false,
        };
        let builder = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&request);

        debug!(messages = messages.len(), "Sending completion request");

        // The HTTP exchange runs on its own task so a slow API never holds up
        // the task that handles gateway events.
        let (status, body) = tokio::spawn(async move {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await
        .map_err(|e| CompletionError::Transport(format!("request task failed: {e}")))?
        .map_err(Self::map_reqwest_error)?;

        self.parse_response(status, &body).await
    }

    async fn parse_response(&self, status: StatusCode, body: &str) -> Result<String, CompletionError> {
        if !status.is_success() {
            let detail = Self::truncate_error_detail(
                &Self::extract_error_detail(body),
                ERROR_DETAIL_MAX_CHARS,
            );
            return Err(CompletionError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        let value: Value =
            serde_json::from_str(body).map_err(|e| CompletionError::Decode(e.to_string()))?;

        if let Some(tokens) = value
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(Value::as_u64)
        {
            let total = self.usage.lock().await.add_tokens(tokens);
            info!(total_tokens = total, "Total tokens used: {}", total);
        }

        value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CompletionError::MalformedResponse {
                raw: value.to_string(),
            })
    }

    fn extract_error_detail(body: &str) -> String {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return String::new();
        }

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if let Some(msg) = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
            {
                return msg.to_string();
            }
            if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
                return msg.to_string();
            }
        }

        trimmed.to_string()
    }

    fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
        if detail.chars().count() <= max_chars {
            return detail.to_string();
        }

        let mut truncated = detail.chars().take(max_chars).collect::<String>();
        truncated.push_str("... [truncated]");
        truncated
    }

    fn map_reqwest_error(e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            CompletionError::Timeout(e.to_string())
        } else if e.is_connect() {
            CompletionError::Transport(format!("network: {e}"))
        } else {
            CompletionError::Transport(e.to_string())
        }
    }
}
