use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ChatSummary;

/// Opaque resume position returned by the chat listing endpoint.
///
/// The backend hands back a structured key; the client never looks inside it and only echoes it
/// back on the next request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaginationCursor(Value);

impl PaginationCursor {
    /// Wraps a raw cursor value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The value to send as the `last_eval_key` query parameter.
    pub fn to_query_value(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<&str> for PaginationCursor {
    fn from(s: &str) -> Self {
        Self(Value::String(s.to_string()))
    }
}

/// One page of the chat listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPage {
    /// Chats on this page.
    #[serde(default)]
    pub items: Vec<ChatSummary>,

    /// Where the next page starts; `None` when there are no further pages.
    #[serde(default)]
    pub last_eval_key: Option<PaginationCursor>,
}

impl ChatPage {
    /// Creates a page.
    pub fn new(items: Vec<ChatSummary>, last_eval_key: Option<PaginationCursor>) -> Self {
        Self {
            items,
            last_eval_key,
        }
    }

    /// An empty final page.
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }
}
