// Public modules
pub mod chat_identity;
pub mod chat_page;
pub mod chat_summary;
pub mod message;
pub mod protocol_event;
pub mod send_frame;
pub mod upload;

// Re-exports
pub use chat_identity::ChatIdentity;
pub use chat_page::{ChatPage, PaginationCursor};
pub use chat_summary::{ChatRecord, ChatSummary, TITLE_PREVIEW_CHARS, title_preview};
pub use message::{Message, MessageKind, MessageKindParseError, MessageRole};
pub use protocol_event::ProtocolEvent;
pub use send_frame::{SendFrame, UserMessage};
pub use upload::{ArmedMedia, LocalFile, PendingUpload, UploadResponse};
