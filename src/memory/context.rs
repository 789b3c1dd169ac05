//! Prompt formatting for completion requests

use super::history::{ChannelId, Speaker, Turn};
use super::ConversationMemory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role in the chat completions wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<Speaker> for Role {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::Assistant => Role::Assistant,
            Speaker::User => Role::User,
        }
    }
}

/// One entry of the `messages` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Builds the ordered message list for a channel
#[derive(Debug, Clone)]
pub struct PromptFormatter {
    system_prompt: String,
}

impl PromptFormatter {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Format a channel's conversation as of now
    pub fn format(
        &self,
        memory: &mut ConversationMemory,
        channel: ChannelId,
        pending_user_text: Option<&str>,
    ) -> Vec<ChatMessage> {
        self.format_at(memory, channel, pending_user_text, Utc::now())
    }

    /// Format a channel's conversation.
    ///
    /// Touches the channel (which may evict others under the capacity
    /// ceiling), then emits the system prompt, the stored turns, and the
    /// pending user text if it is non-empty. The pending text is not stored.
    pub fn format_at(
        &self,
        memory: &mut ConversationMemory,
        channel: ChannelId,
        pending_user_text: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<ChatMessage> {
        memory.touch_at(channel, now);
        let turns = memory.snapshot(channel);
        self.render(&turns, pending_user_text)
    }

    /// Pure rendering of turns into chat messages
    pub fn render(&self, turns: &[Turn], pending_user_text: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(ChatMessage::new(Role::System, self.system_prompt.as_str()));

        messages.extend(
            turns
                .iter()
                .map(|turn| ChatMessage::new(turn.speaker.into(), turn.text.as_str())),
        );

        if let Some(pending) = pending_user_text.filter(|text| !text.is_empty()) {
            messages.push(ChatMessage::new(Role::User, pending));
        }

        messages
    }
}
