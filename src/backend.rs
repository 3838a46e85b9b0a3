use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    ChatIdentity, ChatPage, ChatRecord, ChatSummary, LocalFile, Message, PaginationCursor,
    UserMessage,
};

/// The request/response half of the backend.
///
/// Streaming replies travel over the websocket; everything else the controllers need goes
/// through this trait.  [`ApiClient`](crate::ApiClient) implements it over HTTP.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Loads every message of one chat.
    async fn chat_history(&self, identity: &ChatIdentity) -> Result<ChatRecord>;

    /// Lists chats, newest first, starting after `cursor`.
    ///
    /// A listing with no chats at all may be reported as [`Error::NotFound`](crate::Error).
    async fn list_chats(
        &self,
        limit: usize,
        cursor: Option<&PaginationCursor>,
    ) -> Result<ChatPage>;

    /// Searches chats by content.
    async fn search_chats(&self, term: &str) -> Result<Vec<ChatSummary>>;

    /// Deletes one chat.
    async fn delete_chat(&self, identity: &ChatIdentity) -> Result<()>;

    /// Uploads files in one request, returning one storage key per file in order.
    async fn upload_media(&self, files: &[LocalFile]) -> Result<Vec<String>>;

    /// Runs an image-generation turn and returns the assistant's reply.
    async fn generate_image(
        &self,
        identity: &ChatIdentity,
        message: &UserMessage,
    ) -> Result<Message>;
}
