//! The chat list, fetched page by page or replaced by search results.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::observability::{HISTORY_PAGES, HISTORY_SEARCHES};
use crate::types::{ChatIdentity, ChatPage, ChatSummary, PaginationCursor};

/// Chats requested per page by default.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Accumulates chat summaries across pages.
///
/// In paginated mode each [`fetch_page`](Self::fetch_page) appends the next page and stores the
/// cursor the backend handed back; a missing cursor means the list is complete.  A search
/// replaces the list with its results and marks it complete until the next reset.
#[derive(Debug, Clone)]
pub struct HistoryController {
    summaries: Vec<ChatSummary>,
    cursor: Option<PaginationCursor>,
    exhausted: bool,
    page_size: usize,
    search_term: Option<String>,
}

impl HistoryController {
    /// Creates an empty controller.
    pub fn new(page_size: usize) -> Self {
        Self {
            summaries: Vec::new(),
            cursor: None,
            exhausted: false,
            page_size,
            search_term: None,
        }
    }

    /// The summaries, in backend order.
    pub fn summaries(&self) -> &[ChatSummary] {
        &self.summaries
    }

    /// The summary at `index`.
    pub fn get(&self, index: usize) -> Option<&ChatSummary> {
        self.summaries.get(index)
    }

    /// The cursor for the next page.
    pub fn cursor(&self) -> Option<&PaginationCursor> {
        self.cursor.as_ref()
    }

    /// Returns true once no further pages exist.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// The active search, if any.
    pub fn search_term(&self) -> Option<&str> {
        self.search_term.as_deref()
    }

    /// Chats requested per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetches a page.
    ///
    /// With `reset` the list, cursor and search are discarded and the first page is requested;
    /// otherwise the next page is requested and appended, unless the list is exhausted.  Returns
    /// how many summaries arrived.
    pub async fn fetch_page<B: Backend + ?Sized>(&mut self, backend: &B, reset: bool) -> Result<usize> {
        if reset {
            self.summaries.clear();
            self.cursor = None;
            self.exhausted = false;
            self.search_term = None;
        } else if self.exhausted {
            return Ok(0);
        }
        HISTORY_PAGES.click();
        let page = backend
            .list_chats(self.page_size, self.cursor.as_ref())
            .await
            .or_else(empty_when_not_found(ChatPage::empty))?;
        let count = page.items.len();
        self.summaries.extend(page.items);
        self.exhausted = page.last_eval_key.is_none();
        self.cursor = page.last_eval_key;
        tracing::debug!(count, exhausted = self.exhausted, "fetched chat page");
        Ok(count)
    }

    /// Replaces the list with the chats matching `term`.
    ///
    /// An empty or whitespace term clears the search and fetches the first page.
    pub async fn search<B: Backend + ?Sized>(&mut self, backend: &B, term: &str) -> Result<usize> {
        let term = term.trim();
        if term.is_empty() {
            return self.fetch_page(backend, true).await;
        }
        HISTORY_SEARCHES.click();
        let results = backend
            .search_chats(term)
            .await
            .or_else(empty_when_not_found(Vec::new))?;
        let count = results.len();
        self.summaries = results;
        self.cursor = None;
        self.exhausted = true;
        self.search_term = Some(term.to_string());
        tracing::debug!(count, term, "searched chats");
        Ok(count)
    }

    /// Deletes a chat and, once the backend confirms, its summary.
    pub async fn delete_summary<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        chat_id: &str,
        timestamp: f64,
    ) -> Result<()> {
        backend
            .delete_chat(&ChatIdentity::new(chat_id, timestamp))
            .await?;
        self.summaries.retain(|s| !s.matches(chat_id, timestamp));
        tracing::info!(chat_id, timestamp, "deleted chat");
        Ok(())
    }
}

impl Default for HistoryController {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

// The backend answers 404 when there is nothing to list.
fn empty_when_not_found<T>(empty: impl FnOnce() -> T) -> impl FnOnce(Error) -> Result<T> {
    move |err| {
        if err.is_not_found() {
            Ok(empty())
        } else {
            Err(err)
        }
    }
}
