//! Integration tests for the Arnoldii reply pipeline

use arnoldii::knowledge::{MessageSink, MAX_CHUNK_CHARS, NOT_CONFIGURED_MESSAGE};
use arnoldii::memory::Speaker;
use arnoldii::{
    BotConfig, CompletionClient, ConversationMemory, KnowledgeAgent, PromptFormatter,
    ResponseDelivery, SharedMemory,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SYSTEM_PROMPT: &str = "You are a test assistant.";

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn agent(memory: SharedMemory, client: CompletionClient) -> KnowledgeAgent {
    KnowledgeAgent::new(
        memory,
        PromptFormatter::new(SYSTEM_PROMPT),
        client,
        ResponseDelivery::new().with_pacing(Duration::ZERO),
    )
}

/// Agent without an API key: never touches the network
fn offline_agent(max_turns: usize, max_channels: usize) -> KnowledgeAgent {
    agent(
        ConversationMemory::new(max_turns, max_channels).shared(),
        CompletionClient::new(None, "http://127.0.0.1:9/v1/chat/completions", "deepseek-chat"),
    )
}

async fn mock_completion(server: &MockServer, content: &str, tokens: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "total_tokens": tokens }
        })))
        .mount(server)
        .await;
}

fn online_client(server: &MockServer) -> CompletionClient {
    CompletionClient::new(
        Some("sk-test".to_string()),
        format!("{}/v1/chat/completions", server.uri()),
        "deepseek-chat",
    )
}

/// A full exchange records both turns and delivers the reply
#[tokio::test]
async fn test_reply_delivered_and_recorded() {
    let server = MockServer::start().await;
    mock_completion(&server, "Four.", 21).await;

    let memory = ConversationMemory::new(5, 10).shared();
    let agent = agent(memory.clone(), online_client(&server));
    let sink = RecordingSink::default();

    let sent = agent.handle(42, "what is 2+2?", &sink).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(sink.sent(), vec!["Four.".to_string()]);

    let turns = memory.lock().await.snapshot(42);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].speaker, Speaker::User);
    assert_eq!(turns[0].text, "what is 2+2?");
    assert_eq!(turns[1].speaker, Speaker::Assistant);
    assert_eq!(turns[1].text, "Four.");

    let usage = agent.usage().await;
    assert_eq!(usage.total_tokens, 21);
    assert_eq!(usage.requests_today, 1);
}

/// The request carries the system prompt and the stored history in order
#[tokio::test]
async fn test_request_includes_history() {
    let server = MockServer::start().await;
    mock_completion(&server, "ok", 1).await;

    let agent = agent(ConversationMemory::new(5, 10).shared(), online_client(&server));
    let sink = RecordingSink::default();

    agent.handle(7, "first", &sink).await.unwrap();
    agent.handle(7, "second", &sink).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(messages[0]["content"], SYSTEM_PROMPT);
    assert_eq!(messages[3]["content"], "second");
    assert_eq!(body["model"], "deepseek-chat");
}

/// History never grows past max_turns, oldest dropped first
#[tokio::test]
async fn test_history_bounded() {
    let server = MockServer::start().await;
    mock_completion(&server, "reply", 1).await;

    let memory = ConversationMemory::new(3, 10).shared();
    let agent = agent(memory.clone(), online_client(&server));
    let sink = RecordingSink::default();

    for prompt in ["one", "two", "three"] {
        agent.handle(1, prompt, &sink).await.unwrap();
    }

    let texts: Vec<String> = memory
        .lock()
        .await
        .snapshot(1)
        .into_iter()
        .map(|t| t.text)
        .collect();
    assert_eq!(texts, vec!["reply", "three", "reply"]);
}

/// Long replies arrive as several messages under the Discord limit
#[tokio::test]
async fn test_long_reply_chunked() {
    let server = MockServer::start().await;
    let long = "a".repeat(4500);
    mock_completion(&server, &long, 900).await;

    let agent = agent(ConversationMemory::new(5, 10).shared(), online_client(&server));
    let sink = RecordingSink::default();

    let sent = agent.handle(3, "tell me a story", &sink).await.unwrap();
    assert_eq!(sent, 3);
    assert!(sink
        .sent()
        .iter()
        .all(|m| m.chars().count() <= MAX_CHUNK_CHARS));
}

/// Without a key the channel gets the configuration message, which is also stored
#[tokio::test]
async fn test_missing_api_key_reply() {
    let agent = offline_agent(5, 10);
    let sink = RecordingSink::default();

    agent.handle(5, "hello", &sink).await.unwrap();
    assert_eq!(sink.sent(), vec![NOT_CONFIGURED_MESSAGE.to_string()]);

    let memory = agent.memory();
    let turns = memory.lock().await.snapshot(5);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].text, NOT_CONFIGURED_MESSAGE);
    assert_eq!(agent.usage().await.requests_today, 0);
}

/// API errors become a reply instead of failing the handler
#[tokio::test]
async fn test_api_error_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "message": "upstream exploded" }
        })))
        .mount(&server)
        .await;

    let agent = agent(ConversationMemory::new(5, 10).shared(), online_client(&server));
    let sink = RecordingSink::default();

    agent.handle(9, "hi", &sink).await.unwrap();
    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("I encountered an error"));
    assert!(sent[0].contains("upstream exploded"));
}

/// The 11th channel pushes out the least recently used one
#[tokio::test]
async fn test_eleventh_channel_evicts_oldest() {
    let agent = offline_agent(5, 10);

    for channel in 1..=10u64 {
        agent.respond(channel, "hi").await;
    }
    // Channel 1 becomes recent again, so 2 is now the oldest
    agent.respond(1, "still here").await;
    agent.respond(11, "new").await;

    let memory = agent.memory();
    let memory = memory.lock().await;
    let store = memory.store();
    assert_eq!(store.channel_count(), 10);
    assert!(store.is_tracked(1));
    assert!(!store.is_tracked(2));
    assert!(store.is_tracked(11));
    assert!(store.is_consistent());
}

/// Clearing empties the turns but keeps the channel alive
#[tokio::test]
async fn test_clear_keeps_channel() {
    let agent = offline_agent(5, 10);
    agent.respond(4, "remember me").await;

    assert!(agent.clear(4).await);
    assert!(agent.clear(404).await);

    let memory = agent.memory();
    let memory = memory.lock().await;
    assert!(memory.snapshot(4).is_empty());
    assert!(memory.store().is_tracked(4));
    assert!(!memory.store().is_tracked(404));
}

/// File values apply on top of defaults and env on top of the file
#[test]
fn test_config_layering() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_file,
        "max_turns = 3\nmodel = \"from-file\"\nhealth_port = 9100\nbot_names = [\"Arnie\"]\n",
    )
    .unwrap();

    let mut config = BotConfig::default();
    config.apply_file(&config_file).unwrap();
    config.apply_env(|name| match name {
        "DEEPSEEK_MODEL" => Some("from-env".to_string()),
        "DEEPSEEK_API_KEY" => Some("sk-env".to_string()),
        _ => None,
    });

    assert_eq!(config.max_turns, 3);
    assert_eq!(config.model, "from-env");
    assert_eq!(config.health_port, 9100);
    assert_eq!(config.bot_names, vec!["arnie".to_string()]);
    assert_eq!(config.api_key.as_deref(), Some("sk-env"));
    assert!(config.validate().is_ok());
    assert!(config.require_discord_token().is_err());
}
