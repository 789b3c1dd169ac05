//! Chunked, paced delivery of replies
//!
//! Discord rejects messages over 2000 characters, so long replies are cut
//! into chunks that stay under [`MAX_CHUNK_CHARS`] (continuation marker
//! included) and sent with a short pause in between.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Upper bound on every sent message, marker included
pub const MAX_CHUNK_CHARS: usize = 1900;
/// Replies longer than this are cut before chunking
pub const MAX_RESPONSE_CHARS: usize = 6000;
/// Pause between consecutive chunks
pub const CHUNK_PACING: Duration = Duration::from_millis(500);
/// Prefix on every chunk after the first
pub const CONTINUATION_MARKER: &str = "(continued) ";
/// Appended when a reply was cut at [`MAX_RESPONSE_CHARS`]
pub const TRUNCATION_NOTICE: &str = "\n\n[Response truncated]";

/// Somewhere replies can be sent (a Discord channel in production)
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Splits and sends replies
#[derive(Debug, Clone)]
pub struct ResponseDelivery {
    max_chunk_chars: usize,
    max_response_chars: usize,
    pacing: Duration,
}

impl Default for ResponseDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDelivery {
    pub fn new() -> Self {
        Self {
            max_chunk_chars: MAX_CHUNK_CHARS,
            max_response_chars: MAX_RESPONSE_CHARS,
            pacing: CHUNK_PACING,
        }
    }

    /// Override the pause between chunks
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Cut `text` to the hard ceiling, appending the truncation notice if it was cut
    pub fn truncate(&self, text: &str) -> String {
        match text.char_indices().nth(self.max_response_chars) {
            Some((byte_index, _)) => format!("{}{}", &text[..byte_index], TRUNCATION_NOTICE),
            None => text.to_string(),
        }
    }

    /// The exact messages `deliver` would send, in order
    pub fn prepare(&self, text: &str) -> Vec<String> {
        let text = self.truncate(text);
        if text.is_empty() {
            return Vec::new();
        }

        let continued_room = self
            .max_chunk_chars
            .saturating_sub(CONTINUATION_MARKER.chars().count())
            .max(1);

        let mut chunks = Vec::new();
        let mut remaining = text.as_str();
        let mut room = self.max_chunk_chars;

        while !remaining.is_empty() {
            let (head, tail) = split_at_char(remaining, room);
            if chunks.is_empty() {
                chunks.push(head.to_string());
            } else {
                chunks.push(format!("{CONTINUATION_MARKER}{head}"));
            }
            remaining = tail;
            room = continued_room;
        }

        chunks
    }

    /// Send a reply through `sink`. Returns the number of messages sent.
    ///
    /// Stops at the first failed send without retrying; the error goes back
    /// to the caller to log.
    pub async fn deliver(&self, sink: &dyn MessageSink, text: &str) -> anyhow::Result<usize> {
        let chunks = self.prepare(text);
        if chunks.is_empty() {
            debug!("Empty reply, nothing to deliver");
            return Ok(0);
        }

        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            sink.send(chunk).await?;
        }

        if total > 1 {
            debug!(chunks = total, "Delivered reply in chunks");
        }
        Ok(total)
    }
}

/// Split after the first `n` characters
fn split_at_char(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((byte_index, _)) => s.split_at(byte_index),
        None => (s, ""),
    }
}
