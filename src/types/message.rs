use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Who authored a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The person typing.
    User,

    /// The language model.
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// What a message asks for or carries.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A text turn, streamed over the connection.
    #[default]
    Text,

    /// An image-generation turn, answered in one piece over HTTP.
    Image,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Text => write!(f, "text"),
            MessageKind::Image => write!(f, "image"),
        }
    }
}

/// Error returned when parsing an unknown message kind.
#[derive(Debug)]
pub struct MessageKindParseError {
    /// The string that could not be parsed.
    pub invalid_value: String,
}

impl fmt::Display for MessageKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown message kind: {}", self.invalid_value)
    }
}

impl std::error::Error for MessageKindParseError {}

impl FromStr for MessageKind {
    type Err = MessageKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            _ => Err(MessageKindParseError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

/// One entry of the live message list.
///
/// Messages loaded from history deserialize from the backend's chat records; the fields that
/// exist only on the client (`is_placeholder`, `preview_urls`) are never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Text of the message; grows while a reply streams.
    pub content: String,

    /// Who authored the message.
    pub role: MessageRole,

    /// The model that produced, or will produce, this message.
    #[serde(rename = "llm_model", default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// Text or image turn.
    #[serde(rename = "message_type", default)]
    pub kind: MessageKind,

    /// True only for the assistant message shown while awaiting the first token.
    #[serde(skip)]
    pub is_placeholder: bool,

    /// Upload references attached at send time, in attachment order.
    #[serde(
        rename = "media_s3_keys",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub media_keys: Vec<String>,

    /// Generated media reference carried by image replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,

    /// Local preview references for the attachments; never sent to the backend.
    #[serde(skip)]
    pub preview_urls: Vec<String>,
}

impl Message {
    /// Creates a user message.
    pub fn user(content: impl Into<String>, model_id: Option<String>, kind: MessageKind) -> Self {
        Self {
            content: content.into(),
            role: MessageRole::User,
            model_id,
            kind,
            is_placeholder: false,
            media_keys: Vec::new(),
            media: None,
            preview_urls: Vec::new(),
        }
    }

    /// Creates an assistant message with the given content.
    pub fn assistant(content: impl Into<String>, model_id: Option<String>) -> Self {
        Self {
            content: content.into(),
            role: MessageRole::Assistant,
            model_id,
            kind: MessageKind::Text,
            is_placeholder: false,
            media_keys: Vec::new(),
            media: None,
            preview_urls: Vec::new(),
        }
    }

    /// Creates the empty assistant message that stands in for a reply not yet started.
    pub fn placeholder(model_id: Option<String>, kind: MessageKind) -> Self {
        Self {
            is_placeholder: true,
            kind,
            ..Self::assistant("", model_id)
        }
    }

    /// Attaches upload references and their local previews.
    pub fn with_media(mut self, media_keys: Vec<String>, preview_urls: Vec<String>) -> Self {
        self.media_keys = media_keys;
        self.preview_urls = preview_urls;
        self
    }

    /// Returns true if this message was written by the assistant.
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    /// Returns true if this message was written by the user.
    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_value, json, to_value};

    #[test]
    fn history_record_deserialization() {
        let json = json!({
            "content": "draw a cat",
            "role": "user",
            "message_type": "image",
            "media": null,
            "llm_model": "openrouter/mistralai/devstral-2512:free",
            "media_s3_keys": null
        });

        let message: Message = from_value(json).unwrap();
        assert_eq!(message.role, MessageRole::User);
        assert_eq!(message.kind, MessageKind::Image);
        assert_eq!(
            message.model_id.as_deref(),
            Some("openrouter/mistralai/devstral-2512:free")
        );
        assert!(message.media_keys.is_empty());
        assert!(!message.is_placeholder);
    }

    #[test]
    fn minimal_record_defaults_to_text() {
        let message: Message =
            from_value(json!({"content": "hi", "role": "assistant"})).unwrap();
        assert_eq!(message.kind, MessageKind::Text);
        assert!(message.model_id.is_none());
    }

    #[test]
    fn previews_are_never_serialized() {
        let message = Message::user("look", Some("m".to_string()), MessageKind::Text).with_media(
            vec!["temp/a.png".to_string()],
            vec!["file:///tmp/a.png".to_string()],
        );
        let value = to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "content": "look",
                "role": "user",
                "llm_model": "m",
                "message_type": "text",
                "media_s3_keys": ["temp/a.png"]
            })
        );
    }

    #[test]
    fn placeholder_is_empty_assistant() {
        let placeholder = Message::placeholder(Some("m".to_string()), MessageKind::Text);
        assert!(placeholder.is_assistant());
        assert!(placeholder.is_placeholder);
        assert!(placeholder.content.is_empty());
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("image".parse::<MessageKind>().unwrap(), MessageKind::Image);
        assert!("video".parse::<MessageKind>().is_err());
        assert_eq!(MessageKind::Text.to_string(), "text");
    }
}
