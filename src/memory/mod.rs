//! Memory module for Arnoldii
//!
//! Provides the bounded per-channel history, the two eviction policies that
//! keep it bounded, and the prompt formatter that reads from it.

mod context;
mod eviction;
mod history;

pub use context::{ChatMessage, PromptFormatter, Role};
pub use eviction::{CapacityPolicy, IdleSweep, MAX_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
pub use history::{ChannelId, HistoryStore, Speaker, Turn};

use crate::BotConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Handle shared between message handlers and the idle sweep
pub type SharedMemory = Arc<Mutex<ConversationMemory>>;

/// History store with the capacity ceiling applied after every mutation
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    store: HistoryStore,
    capacity: CapacityPolicy,
}

impl ConversationMemory {
    pub fn new(max_turns: usize, max_channels: usize) -> Self {
        Self {
            store: HistoryStore::new(max_turns),
            capacity: CapacityPolicy::new(max_channels),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(config.max_turns, config.max_channels)
    }

    /// Wrap into the shared handle
    pub fn shared(self) -> SharedMemory {
        Arc::new(Mutex::new(self))
    }

    /// Record a turn now. Returns channels evicted to make room.
    pub fn append(
        &mut self,
        channel: ChannelId,
        speaker: Speaker,
        text: impl Into<String>,
    ) -> Vec<ChannelId> {
        self.append_at(channel, speaker, text, Utc::now())
    }

    /// Record a turn at an explicit time. Returns channels evicted to make room.
    pub fn append_at(
        &mut self,
        channel: ChannelId,
        speaker: Speaker,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Vec<ChannelId> {
        if self.store.append(channel, speaker, text, now) {
            self.capacity.enforce(&mut self.store)
        } else {
            Vec::new()
        }
    }

    /// Mark a channel as used (creating it if needed) and apply the ceiling
    pub fn touch_at(&mut self, channel: ChannelId, now: DateTime<Utc>) -> Vec<ChannelId> {
        self.store.touch(channel, now);
        self.capacity.enforce(&mut self.store)
    }

    /// Empty a channel's history; always succeeds
    pub fn clear(&mut self, channel: ChannelId) -> bool {
        self.store.clear(channel);
        true
    }

    /// Owned copy of a channel's turns
    pub fn snapshot(&self, channel: ChannelId) -> Vec<Turn> {
        self.store.snapshot(channel)
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut HistoryStore {
        &mut self.store
    }
}
