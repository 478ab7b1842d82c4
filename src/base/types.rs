//! Shared types for the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// One inbound chat message awaiting a reply.
///
/// Created by the ingestion layer for every non-self event addressed to the bot,
/// and consumed by the relay worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// The conversation (channel) the reply goes back to.
    pub channel_id: String,
    /// The sender's platform identity.
    pub sender_id: String,
    /// Mention token for the sender, prefixed to the reply.
    pub sender_mention: String,
    /// The message text with the bot mention removed.
    pub text: String,
    /// When the request entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

impl ChatRequest {
    pub fn new(channel_id: impl Into<String>, sender_id: impl Into<String>, sender_mention: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            sender_id: sender_id.into(),
            sender_mention: sender_mention.into(),
            text: text.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Speaker of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Append-only conversation history owned by a single backend adapter.
///
/// Exchanges are only ever appended as a complete user/assistant pair, so a
/// failed backend call leaves the history untouched. Nothing here prunes or
/// caps the history; it grows for the lifetime of the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a history from existing entries (e.g. a persisted transcript).
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    /// Record a completed exchange.
    pub fn append_exchange(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.entries.reserve(2);
        self.entries.push(HistoryEntry { role: Role::User, text: user_text.into() });
        self.entries.push(HistoryEntry { role: Role::Assistant, text: assistant_text.into() });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// Tests.
