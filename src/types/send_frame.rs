use serde::{Deserialize, Serialize};

use crate::types::{ChatIdentity, Message, MessageKind, MessageRole};

/// The user message embedded in an outbound frame.
///
/// This is also the request body of the image-generation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Always `user`.
    pub role: MessageRole,

    /// What the user typed.
    pub content: String,

    /// The model asked to answer.
    pub llm_model: String,

    /// Text or image turn.
    pub message_type: MessageKind,

    /// Upload references attached to the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_s3_keys: Option<Vec<String>>,
}

impl UserMessage {
    /// Creates a user message for the given model.
    pub fn new(content: impl Into<String>, llm_model: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            llm_model: llm_model.into(),
            message_type: kind,
            media_s3_keys: None,
        }
    }

    /// Attaches upload references; an empty set is omitted from the frame.
    pub fn with_media_keys(mut self, keys: Vec<String>) -> Self {
        self.media_s3_keys = if keys.is_empty() { None } else { Some(keys) };
        self
    }

    /// The live-list message this outbound message corresponds to.
    pub fn to_message(&self) -> Message {
        Message::user(
            self.content.clone(),
            Some(self.llm_model.clone()),
            self.message_type,
        )
        .with_media(self.media_s3_keys.clone().unwrap_or_default(), Vec::new())
    }
}

/// An outbound frame on the streaming connection.
///
/// The identity fields are present only once the conversation is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendFrame {
    /// The message to append to the conversation.
    pub user_message: UserMessage,

    /// Chat id of a bound conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,

    /// Timestamp of a bound conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl SendFrame {
    /// Creates a frame, embedding the identity when there is one.
    pub fn new(user_message: UserMessage, identity: Option<&ChatIdentity>) -> Self {
        Self {
            user_message,
            chat_id: identity.map(|id| id.chat_id.clone()),
            timestamp: identity.map(|id| id.timestamp),
        }
    }

    /// Returns the embedded identity, if both fields are present.
    pub fn identity(&self) -> Option<ChatIdentity> {
        match (&self.chat_id, self.timestamp) {
            (Some(chat_id), Some(timestamp)) => Some(ChatIdentity::new(chat_id.clone(), timestamp)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn draft_frame_omits_identity() {
        let frame = SendFrame::new(UserMessage::new("hi", "m-1", MessageKind::Text), None);
        assert_eq!(
            to_value(&frame).unwrap(),
            json!({
                "user_message": {
                    "role": "user",
                    "content": "hi",
                    "llm_model": "m-1",
                    "message_type": "text"
                }
            })
        );
        assert_eq!(frame.identity(), None);
    }

    #[test]
    fn bound_frame_embeds_identity_and_keys() {
        let identity = ChatIdentity::new("abc", 1700000000.5);
        let message = UserMessage::new("see attached", "m-1", MessageKind::Text)
            .with_media_keys(vec!["temp/1.png".to_string(), "temp/2.png".to_string()]);
        let frame = SendFrame::new(message, Some(&identity));
        assert_eq!(
            to_value(&frame).unwrap(),
            json!({
                "user_message": {
                    "role": "user",
                    "content": "see attached",
                    "llm_model": "m-1",
                    "message_type": "text",
                    "media_s3_keys": ["temp/1.png", "temp/2.png"]
                },
                "chat_id": "abc",
                "timestamp": 1700000000.5
            })
        );
        assert_eq!(frame.identity(), Some(identity));
    }

    #[test]
    fn empty_keys_are_omitted() {
        let message = UserMessage::new("x", "m", MessageKind::Image).with_media_keys(vec![]);
        assert!(message.media_s3_keys.is_none());
        assert_eq!(message.to_message().kind, MessageKind::Image);
    }
}
