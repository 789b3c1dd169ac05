//! Knowledge module
//!
//! The request/response pipeline behind every reply: record the user turn,
//! format the channel history, ask the completion API, record the reply and
//! deliver it.

mod completion;
mod delivery;

pub use completion::{
    CompletionClient, CompletionError, UsageCounter, DEGRADED_MESSAGE, MAX_TOKENS,
    NOT_CONFIGURED_MESSAGE, TEMPERATURE,
};
pub use delivery::{
    MessageSink, ResponseDelivery, CHUNK_PACING, CONTINUATION_MARKER, MAX_CHUNK_CHARS,
    MAX_RESPONSE_CHARS, TRUNCATION_NOTICE,
};

use crate::memory::{ChannelId, PromptFormatter, SharedMemory, Speaker};
use crate::BotConfig;
use std::time::Instant;
use tracing::info;

/// Ties the memory, formatter, completion client and delivery together
pub struct KnowledgeAgent {
    memory: SharedMemory,
    formatter: PromptFormatter,
    client: CompletionClient,
    delivery: ResponseDelivery,
}

impl KnowledgeAgent {
    pub fn new(
        memory: SharedMemory,
        formatter: PromptFormatter,
        client: CompletionClient,
        delivery: ResponseDelivery,
    ) -> Self {
        Self {
            memory,
            formatter,
            client,
            delivery,
        }
    }

    /// Build the production pipeline around an existing memory handle
    pub fn from_config(config: &BotConfig, memory: SharedMemory) -> Self {
        Self::new(
            memory,
            PromptFormatter::new(config.system_prompt.clone()),
            CompletionClient::from_config(config),
            ResponseDelivery::new(),
        )
    }

    pub fn memory(&self) -> SharedMemory {
        self.memory.clone()
    }

    /// Produce a reply for `text` in `channel`, updating the channel history.
    ///
    /// The memory lock is released while the completion is in flight, so the
    /// channel may be swept in between; the reply then simply starts a fresh
    /// history for it.
    pub async fn respond(&self, channel: ChannelId, text: &str) -> String {
        let messages = {
            let mut memory = self.memory.lock().await;
            memory.append(channel, Speaker::User, text);
            self.formatter.format(&mut memory, channel, None)
        };

        let started = Instant::now();
        let reply = self.client.complete(&messages).await;
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            channel,
            elapsed_secs = elapsed,
            "DeepSeek API response time: {:.2} seconds",
            elapsed
        );

        self.memory
            .lock()
            .await
            .append(channel, Speaker::Assistant, reply.as_str());

        reply
    }

    /// Reply to `text` and send the result to `sink`.
    /// Returns the number of messages sent.
    pub async fn handle(
        &self,
        channel: ChannelId,
        text: &str,
        sink: &dyn MessageSink,
    ) -> anyhow::Result<usize> {
        let reply = self.respond(channel, text).await;
        self.delivery.deliver(sink, &reply).await
    }

    /// Forget a channel's turns; always succeeds
    pub async fn clear(&self, channel: ChannelId) -> bool {
        self.memory.lock().await.clear(channel)
    }

    /// Current API usage figures
    pub async fn usage(&self) -> UsageCounter {
        self.client.usage().await
    }
}
