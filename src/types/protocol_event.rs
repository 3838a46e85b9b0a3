use serde::{Deserialize, Serialize};

use crate::types::ChatIdentity;

/// An inbound frame on the streaming connection.
///
/// Frames are JSON objects discriminated by their `type` field.  The backend serializes every
/// frame with the same set of optional fields, so each variant tolerates fields it does not use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// A fragment of the reply being generated.
    Token {
        /// The fragment; absent fragments append nothing.
        #[serde(default)]
        content: Option<String>,
    },

    /// The reply finished successfully.
    StreamFinished {},

    /// The backend persisted a new chat and assigned it an identity.
    ChatCreated {
        /// The assigned chat id.
        chat_id: String,

        /// The assigned timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_timestamp: Option<f64>,

        /// The assigned timestamp, as spelled by newer backends.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },

    /// Generation failed; the reply will not complete.
    Error {
        /// Backend-provided detail, for logs only.
        #[serde(default)]
        content: Option<String>,
    },
}

impl ProtocolEvent {
    /// Creates a token event.
    pub fn token(content: impl Into<String>) -> Self {
        ProtocolEvent::Token {
            content: Some(content.into()),
        }
    }

    /// Creates a stream-finished event.
    pub fn stream_finished() -> Self {
        ProtocolEvent::StreamFinished {}
    }

    /// Creates a chat-created event for the given identity.
    pub fn chat_created(identity: &ChatIdentity) -> Self {
        ProtocolEvent::ChatCreated {
            chat_id: identity.chat_id.clone(),
            chat_timestamp: Some(identity.timestamp),
            timestamp: None,
        }
    }

    /// Creates an error event.
    pub fn error(content: Option<String>) -> Self {
        ProtocolEvent::Error { content }
    }

    /// Returns the identity carried by a `chat_created` event.
    ///
    /// Returns `None` for other events, and for a `chat_created` event without a timestamp,
    /// since an identity is never partially set.
    pub fn identity(&self) -> Option<ChatIdentity> {
        match self {
            ProtocolEvent::ChatCreated {
                chat_id,
                chat_timestamp,
                timestamp,
            } => chat_timestamp
                .or(*timestamp)
                .map(|ts| ChatIdentity::new(chat_id.clone(), ts)),
            _ => None,
        }
    }

    /// Returns true for events that end a reply.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::StreamFinished {} | ProtocolEvent::Error { .. }
        )
    }

    /// The wire name of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::Token { .. } => "token",
            ProtocolEvent::StreamFinished {} => "stream_finished",
            ProtocolEvent::ChatCreated { .. } => "chat_created",
            ProtocolEvent::Error { .. } => "error",
        }
    }
}
