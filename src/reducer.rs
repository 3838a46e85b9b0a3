//! Folds inbound protocol events into the live message list.
//!
//! [`Conversation`] is a pure state machine: every operation takes the current list and one
//! event or user action and leaves the list in its next state.  Only the last message is ever
//! inspected or mutated, so each event costs O(1) regardless of conversation length.
//!
//! Sends follow a two-phase append.  [`Conversation::begin_turn`] appends the user's message and
//! a placeholder for the reply and remembers where the turn started; a terminal event commits the
//! turn, and [`Conversation::rollback_turn`] removes everything the turn appended.

use crate::types::{ChatIdentity, Message, ProtocolEvent};

/// Shown in place of a reply the backend failed to generate.
pub const STREAM_ERROR_FALLBACK: &str =
    "The model had an error generating a response, please try another model or try later.";

/// What applying an event changed, for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Content was appended to the streaming reply.
    Token,
    /// The reply finished.
    Finished,
    /// The backend named the chat; the session decides whether to bind it.
    ChatCreated(ChatIdentity),
    /// The reply failed and now shows the fallback text.
    Failed,
    /// The event carried nothing to apply.
    Ignored,
}

/// The ordered message list of one chat plus its streaming flag.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    processing: bool,
    turn_start: Option<usize>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation from loaded history.
    pub fn from_history(messages: Vec<Message>) -> Self {
        Self {
            messages,
            processing: false,
            turn_start: None,
        }
    }

    /// The messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns true while a reply is streaming.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// Returns true if the last message is a placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.messages.last().is_some_and(|m| m.is_placeholder)
    }

    /// Returns true between `begin_turn` and the turn's terminal event.
    pub fn has_open_turn(&self) -> bool {
        self.turn_start.is_some()
    }

    /// Removes every message and resets streaming state.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.processing = false;
        self.turn_start = None;
    }

    /// Replaces the list with loaded history.
    pub fn load(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.processing = false;
        self.turn_start = None;
    }

    /// Appends the user's message and a placeholder for the reply.
    ///
    /// A placeholder left behind by a turn that finished without tokens is dropped first so at
    /// most one placeholder ever exists.
    pub fn begin_turn(&mut self, user_message: Message, placeholder: Message) {
        if self.has_placeholder() {
            self.messages.pop();
        }
        self.turn_start = Some(self.messages.len());
        self.messages.push(user_message);
        self.messages.push(Message {
            is_placeholder: true,
            ..placeholder
        });
        self.processing = true;
    }

    /// Removes everything the open turn appended.
    ///
    /// Returns false if there was no open turn.
    pub fn rollback_turn(&mut self) -> bool {
        match self.turn_start.take() {
            Some(start) => {
                self.messages.truncate(start);
                self.processing = false;
                true
            }
            None => false,
        }
    }

    /// Completes the open turn with a reply that arrived in one piece.
    pub fn complete_turn(&mut self, reply: Message) {
        if self.has_placeholder() {
            self.messages.pop();
        }
        self.messages.push(Message {
            is_placeholder: false,
            ..reply
        });
        self.processing = false;
        self.turn_start = None;
    }

    /// Applies one inbound event.
    pub fn apply(&mut self, event: &ProtocolEvent) -> Applied {
        match event {
            ProtocolEvent::Token { content } => {
                let content = content.as_deref().unwrap_or("");
                let model_id = match self.messages.last() {
                    Some(last) if last.is_assistant() && last.is_placeholder => {
                        self.messages.pop().and_then(|p| p.model_id)
                    }
                    _ => None,
                };
                match self.messages.last_mut() {
                    Some(last) if last.is_assistant() => last.content.push_str(content),
                    _ => self.messages.push(Message::assistant(content, model_id)),
                }
                self.processing = true;
                Applied::Token
            }
            ProtocolEvent::StreamFinished {} => {
                self.processing = false;
                self.turn_start = None;
                Applied::Finished
            }
            ProtocolEvent::ChatCreated { .. } => match event.identity() {
                Some(identity) => Applied::ChatCreated(identity),
                None => Applied::Ignored,
            },
            ProtocolEvent::Error { .. } => {
                match self.messages.last_mut() {
                    Some(last) if last.is_assistant() => {
                        last.content = STREAM_ERROR_FALLBACK.to_string();
                        last.is_placeholder = false;
                    }
                    _ => self
                        .messages
                        .push(Message::assistant(STREAM_ERROR_FALLBACK, None)),
                }
                self.processing = false;
                self.turn_start = None;
                Applied::Failed
            }
        }
    }
}
