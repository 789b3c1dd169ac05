//! Per-channel conversation history
//!
//! Each channel keeps a ring buffer of its most recent turns plus a
//! last-used timestamp. Both maps always hold the same set of channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Opaque channel identifier (Discord channel snowflake)
pub type ChannelId = u64;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// Anyone talking to the bot
    User,
    /// The bot itself
    Assistant,
}

/// One recorded exchange unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// Bounded history for every tracked channel
#[derive(Debug, Clone)]
pub struct HistoryStore {
    /// Turns per channel (oldest first, at most `max_turns`)
    turns: HashMap<ChannelId, VecDeque<Turn>>,
    /// Last activity per channel
    last_used: HashMap<ChannelId, DateTime<Utc>>,
    max_turns: usize,
}

impl HistoryStore {
    /// Create an empty store keeping at most `max_turns` turns per channel
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: HashMap::new(),
            last_used: HashMap::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// Record a turn, dropping the oldest one if the channel is full.
    ///
    /// Returns `true` if this call started tracking a new channel.
    pub fn append(
        &mut self,
        channel: ChannelId,
        speaker: Speaker,
        text: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let created = self.touch(channel, now);
        let turns = self.turns.entry(channel).or_default();
        while turns.len() >= self.max_turns {
            turns.pop_front();
        }
        turns.push_back(Turn::new(speaker, text));
        created
    }

    /// Mark a channel as used, creating an empty history for it if needed.
    ///
    /// Returns `true` if the channel was not tracked before.
    pub fn touch(&mut self, channel: ChannelId, now: DateTime<Utc>) -> bool {
        let created = !self.turns.contains_key(&channel);
        if created {
            self.turns
                .insert(channel, VecDeque::with_capacity(self.max_turns));
        }
        self.last_used.insert(channel, now);
        created
    }

    /// Empty a channel's turns. The liveness timestamp is left untouched
    /// and untracked channels stay untracked.
    pub fn clear(&mut self, channel: ChannelId) {
        if let Some(turns) = self.turns.get_mut(&channel) {
            turns.clear();
        }
    }

    /// Owned copy of a channel's turns, oldest first
    pub fn snapshot(&self, channel: ChannelId) -> Vec<Turn> {
        self.turns
            .get(&channel)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget a channel entirely (history and liveness record)
    pub fn remove(&mut self, channel: ChannelId) -> bool {
        let had_turns = self.turns.remove(&channel).is_some();
        let had_record = self.last_used.remove(&channel).is_some();
        had_turns || had_record
    }

    /// When the channel was last used, if tracked
    pub fn last_used(&self, channel: ChannelId) -> Option<DateTime<Utc>> {
        self.last_used.get(&channel).copied()
    }

    /// All tracked channels, least recently used first.
    /// Ties are ordered by channel id.
    pub fn channels_by_age(&self) -> Vec<(ChannelId, DateTime<Utc>)> {
        let mut channels: Vec<_> = self
            .last_used
            .iter()
            .map(|(channel, used)| (*channel, *used))
            .collect();
        channels.sort_by_key(|(channel, used)| (*used, *channel));
        channels
    }

    pub fn is_tracked(&self, channel: ChannelId) -> bool {
        self.turns.contains_key(&channel)
    }

    /// Number of tracked channels
    pub fn channel_count(&self) -> usize {
        self.turns.len()
    }

    /// Number of turns stored for a channel
    pub fn turn_count(&self, channel: ChannelId) -> usize {
        self.turns.get(&channel).map_or(0, VecDeque::len)
    }

    /// Whether the history and liveness maps track the same channels
    pub fn is_consistent(&self) -> bool {
        self.turns.len() == self.last_used.len()
            && self.turns.keys().all(|c| self.last_used.contains_key(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_append_keeps_most_recent_turns() {
        let mut store = HistoryStore::new(5);
        for i in 0..12 {
            store.append(1, Speaker::User, format!("msg {i}"), t0());
        }

        let turns = store.snapshot(1);
        assert_eq!(turns.len(), 5);
        let texts: Vec<_> = turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 7", "msg 8", "msg 9", "msg 10", "msg 11"]);
    }

    #[test]
    fn test_append_reports_new_channel() {
        let mut store = HistoryStore::new(5);
        assert!(store.append(1, Speaker::User, "hi", t0()));
        assert!(!store.append(1, Speaker::Assistant, "hello", t0()));
        assert!(store.append(2, Speaker::User, "hi", t0()));
        assert_eq!(store.channel_count(), 2);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_append_updates_liveness() {
        let mut store = HistoryStore::new(5);
        store.append(1, Speaker::User, "a", t0());
        let later = t0() + TimeDelta::minutes(5);
        store.append(1, Speaker::User, "b", later);
        assert_eq!(store.last_used(1), Some(later));
    }

    #[test]
    fn test_clear_keeps_liveness() {
        let mut store = HistoryStore::new(5);
        store.append(1, Speaker::User, "a", t0());
        store.append(1, Speaker::Assistant, "b", t0());

        store.clear(1);
        assert_eq!(store.turn_count(1), 0);
        assert!(store.is_tracked(1));
        assert_eq!(store.last_used(1), Some(t0()));
    }

    #[test]
    fn test_clear_unknown_channel_is_noop() {
        let mut store = HistoryStore::new(5);
        store.clear(42);
        assert!(!store.is_tracked(42));
        assert!(store.is_consistent());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = HistoryStore::new(5);
        store.append(1, Speaker::User, "original", t0());

        let mut snapshot = store.snapshot(1);
        snapshot[0].text = "mutated".to_string();
        snapshot.clear();

        assert_eq!(store.snapshot(1)[0].text, "original");
    }

    #[test]
    fn test_remove_drops_both_records() {
        let mut store = HistoryStore::new(5);
        store.append(1, Speaker::User, "a", t0());
        assert!(store.remove(1));
        assert!(!store.remove(1));
        assert!(store.last_used(1).is_none());
        assert_eq!(store.turn_count(1), 0);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_channels_by_age() {
        let mut store = HistoryStore::new(5);
        store.append(3, Speaker::User, "a", t0() + TimeDelta::seconds(2));
        store.append(1, Speaker::User, "a", t0() + TimeDelta::seconds(1));
        store.append(2, Speaker::User, "a", t0() + TimeDelta::seconds(1));

        let order: Vec<_> = store.channels_by_age().into_iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
