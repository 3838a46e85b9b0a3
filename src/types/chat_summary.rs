use serde::{Deserialize, Serialize};

use crate::types::{ChatIdentity, Message};

/// Longest title preview, in characters, before it is cut with an ellipsis.
pub const TITLE_PREVIEW_CHARS: usize = 48;

/// Preview used for a chat that has no messages.
const EMPTY_TITLE: &str = "New chat";

/// A chat as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Chat id.
    pub chat_id: String,

    /// Chat timestamp.
    pub timestamp: f64,

    /// Owner of the chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,

    /// Every message of the chat, oldest first.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ChatRecord {
    /// The identity of this chat.
    pub fn identity(&self) -> ChatIdentity {
        ChatIdentity::new(self.chat_id.clone(), self.timestamp)
    }
}

/// One row of the chat list.
///
/// Summaries deserialize straight from the backend's chat records and keep only what the list
/// shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChatRecord")]
pub struct ChatSummary {
    /// Chat id.
    pub chat_id: String,

    /// Chat timestamp.
    pub timestamp: f64,

    /// Short preview derived from the first message.
    pub title_preview: String,
}

impl ChatSummary {
    /// Creates a summary directly.
    pub fn new(chat_id: impl Into<String>, timestamp: f64, title_preview: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            timestamp,
            title_preview: title_preview.into(),
        }
    }

    /// The identity of the summarized chat.
    pub fn identity(&self) -> ChatIdentity {
        ChatIdentity::new(self.chat_id.clone(), self.timestamp)
    }

    /// Returns true if this summary names the given chat.
    pub fn matches(&self, chat_id: &str, timestamp: f64) -> bool {
        self.chat_id == chat_id && self.timestamp == timestamp
    }
}

impl From<ChatRecord> for ChatSummary {
    fn from(record: ChatRecord) -> Self {
        let title_preview = record
            .messages
            .first()
            .map(|m| title_preview(&m.content))
            .unwrap_or_else(|| EMPTY_TITLE.to_string());
        Self {
            chat_id: record.chat_id,
            timestamp: record.timestamp,
            title_preview,
        }
    }
}

/// Collapses whitespace and truncates `content` to [`TITLE_PREVIEW_CHARS`].
pub fn title_preview(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return EMPTY_TITLE.to_string();
    }
    if collapsed.chars().count() <= TITLE_PREVIEW_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(TITLE_PREVIEW_CHARS).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push('…');
    truncated
}
