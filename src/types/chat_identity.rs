use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The `(chat_id, timestamp)` pair that names a persisted conversation.
///
/// The backend keys chats on both fields, so they travel together: a conversation that has not
/// been persisted yet has no `ChatIdentity` at all rather than a partially filled one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatIdentity {
    /// Opaque chat identifier.
    pub chat_id: String,

    /// Opaque ordering token assigned on first persistence (seconds since the epoch).
    pub timestamp: f64,
}

impl ChatIdentity {
    /// Creates an identity from its two parts.
    pub fn new(chat_id: impl Into<String>, timestamp: f64) -> Self {
        Self {
            chat_id: chat_id.into(),
            timestamp,
        }
    }

    /// Mints a fresh identity for a conversation that has never been persisted.
    ///
    /// The chat id is a random UUID and the timestamp is the current wall-clock time in seconds,
    /// which is what the backend assigns when it creates a chat itself.
    pub fn mint() -> Self {
        let now = OffsetDateTime::now_utc();
        let timestamp = now.unix_timestamp_nanos() as f64 / 1_000_000_000.0;
        Self {
            chat_id: Uuid::new_v4().to_string(),
            timestamp,
        }
    }

    /// Returns the `{chat_id}/{timestamp}` path suffix used by the chat endpoints.
    pub fn path(&self) -> String {
        format!("{}/{}", self.chat_id, self.timestamp)
    }
}

impl fmt::Display for ChatIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.chat_id, self.timestamp)
    }
}
