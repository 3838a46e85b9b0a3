//! Attachments uploaded ahead of the message that references them.
//!
//! The coordinator is the single writer of the attachment buffer.  Files are staged with a local
//! preview the moment they are selected, uploaded in one batch, and resolved to storage keys
//! positionally.  The keys are handed to the next outgoing message and the buffer is cleared.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::observability::{UPLOAD_BATCHES, UPLOAD_FAILURES, UPLOAD_FILES_REFUSED};
use crate::types::{ArmedMedia, LocalFile, PendingUpload};

/// How many attachments one message may carry by default.
pub const DEFAULT_ATTACHMENT_CAP: usize = 3;

/// Files staged by [`MediaUploadCoordinator::stage`] and awaiting their upload.
#[derive(Debug)]
pub struct UploadBatch {
    ids: Vec<u64>,
    files: Vec<LocalFile>,
    refused: usize,
}

impl UploadBatch {
    /// The files to upload, in order.
    pub fn files(&self) -> &[LocalFile] {
        &self.files
    }

    /// How many files the batch uploads.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// How many offered files were discarded for lack of room.
    pub fn refused(&self) -> usize {
        self.refused
    }
}

/// Owns the attachments of the message being composed.
#[derive(Debug, Clone)]
pub struct MediaUploadCoordinator {
    pending: Vec<PendingUpload>,
    cap: usize,
    next_id: u64,
}

impl MediaUploadCoordinator {
    /// Creates a coordinator that holds at most `cap` attachments.
    pub fn new(cap: usize) -> Self {
        Self {
            pending: Vec::new(),
            cap,
            next_id: 0,
        }
    }

    /// The attachments, in selection order.
    pub fn pending(&self) -> &[PendingUpload] {
        &self.pending
    }

    /// The attachment limit.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// How many more files may be attached.
    pub fn room(&self) -> usize {
        self.cap.saturating_sub(self.pending.len())
    }

    /// How many attachments are still uploading.
    pub fn in_flight(&self) -> usize {
        self.pending.iter().filter(|p| p.is_uploading).count()
    }

    /// Returns true if any attachment is still uploading.
    pub fn is_uploading(&self) -> bool {
        self.pending.iter().any(|p| p.is_uploading)
    }

    /// Stages as many of `files` as there is room for, discarding the rest.
    ///
    /// Staged files appear in [`pending`](Self::pending) at once, marked as uploading.  Returns
    /// `None` if nothing was staged.
    pub fn stage(&mut self, files: Vec<LocalFile>) -> Option<UploadBatch> {
        let room = self.room();
        let refused = files.len().saturating_sub(room);
        if refused > 0 {
            UPLOAD_FILES_REFUSED.count(refused as u64);
            tracing::info!(refused, cap = self.cap, "attachment limit reached");
        }
        let files: Vec<LocalFile> = files.into_iter().take(room).collect();
        if files.is_empty() {
            return None;
        }
        let mut ids = Vec::with_capacity(files.len());
        for file in &files {
            let id = self.next_id;
            self.next_id += 1;
            ids.push(id);
            self.pending.push(PendingUpload {
                id,
                preview_url: file.preview_url(),
                local_file: file.clone(),
                is_uploading: true,
                remote_key: None,
            });
        }
        Some(UploadBatch {
            ids,
            files,
            refused,
        })
    }

    /// Resolves a staged batch with the outcome of its upload.
    ///
    /// On success each still-present entry receives the key at its position; keys of entries
    /// removed while uploading are discarded.  On failure every entry of the batch is removed and
    /// [`Error::Upload`] reports how many were discarded.  Returns how many entries resolved.
    pub fn finish(&mut self, batch: UploadBatch, outcome: Result<Vec<String>>) -> Result<usize> {
        let outcome = outcome.and_then(|keys| {
            if keys.len() == batch.ids.len() {
                Ok(keys)
            } else {
                Err(Error::unknown(format!(
                    "upload returned {} keys for {} files",
                    keys.len(),
                    batch.ids.len()
                )))
            }
        });
        match outcome {
            Ok(keys) => {
                let mut resolved = 0;
                for (id, key) in batch.ids.into_iter().zip(keys) {
                    match self.pending.iter_mut().find(|p| p.id == id) {
                        Some(entry) => {
                            entry.remote_key = Some(key);
                            entry.is_uploading = false;
                            resolved += 1;
                        }
                        None => tracing::debug!(key, "discarding key of removed attachment"),
                    }
                }
                Ok(resolved)
            }
            Err(err) => {
                UPLOAD_FAILURES.click();
                let before = self.pending.len();
                self.pending.retain(|p| !batch.ids.contains(&p.id));
                let discarded = before - self.pending.len();
                tracing::warn!(error = %err, discarded, "upload failed; attachments removed");
                Err(Error::upload("upload failed", discarded, Some(err)))
            }
        }
    }

    /// Stages `files` and uploads them in one request.
    ///
    /// Returns how many attachments resolved.
    pub async fn enqueue<B: Backend + ?Sized>(
        &mut self,
        backend: &B,
        files: Vec<LocalFile>,
    ) -> Result<usize> {
        let Some(batch) = self.stage(files) else {
            return Ok(0);
        };
        UPLOAD_BATCHES.click();
        tracing::debug!(files = batch.len(), "uploading attachments");
        let outcome = backend.upload_media(batch.files()).await;
        self.finish(batch, outcome)
    }

    /// Removes the attachment at `index`.
    ///
    /// A resolved key is released and never attached; a key still being uploaded is discarded
    /// when it arrives.
    pub fn remove(&mut self, index: usize) -> Option<PendingUpload> {
        if index < self.pending.len() {
            Some(self.pending.remove(index))
        } else {
            None
        }
    }

    /// The resolved attachments, without clearing them.
    pub fn peek_armed(&self) -> ArmedMedia {
        let mut armed = ArmedMedia::default();
        for entry in &self.pending {
            if let Some(key) = &entry.remote_key {
                armed.keys.push(key.clone());
                armed.preview_urls.push(entry.preview_url.clone());
            }
        }
        armed
    }

    /// Takes the resolved attachments and clears the buffer.
    pub fn armed_keys(&mut self) -> ArmedMedia {
        let armed = self.peek_armed();
        self.pending.clear();
        armed
    }

    /// Drops every attachment.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for MediaUploadCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACHMENT_CAP)
    }
}
