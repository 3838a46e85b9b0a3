use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;
use utf8path::Path;

use crate::error::{Error, Result};

/// An attachment selected by the user, read into memory.
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Where the file was read from.
    pub path: Path<'static>,

    /// File contents.
    pub content: Bytes,
}

impl LocalFile {
    /// Creates a local file from contents already in memory.
    pub fn new(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            path: Path::from(path.into()),
            content: content.into(),
        }
    }

    /// Reads a file from disk.
    pub async fn read(path: impl Into<String>) -> Result<Self> {
        let path = Path::from(path.into());
        let content = tokio::fs::read(path.as_str())
            .await
            .map_err(|e| Error::io(format!("Failed to read {}: {e}", path.as_str()), e))?;
        Ok(Self {
            path,
            content: Bytes::from(content),
        })
    }

    /// The file name sent with the multipart upload.
    pub fn file_name(&self) -> String {
        self.path.basename().as_str().to_string()
    }

    /// A locally valid reference for previewing the attachment.
    ///
    /// Absolute paths become `file://` URLs; anything else is used as-is.
    pub fn preview_url(&self) -> String {
        Url::from_file_path(self.path.as_str())
            .map(String::from)
            .unwrap_or_else(|()| self.path.as_str().to_string())
    }
}

/// An attachment owned by the upload coordinator until the next send.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// Coordinator-assigned id, stable across removals.
    pub id: u64,

    /// The file being uploaded.
    pub local_file: LocalFile,

    /// Local preview reference.
    pub preview_url: String,

    /// True until the upload request answers.
    pub is_uploading: bool,

    /// Storage key, once the upload succeeded.
    pub remote_key: Option<String>,
}

/// Response of the media upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// One storage key per uploaded file, in request order.
    pub keys: Vec<String>,
}

/// The resolved attachments taken for one outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArmedMedia {
    /// Storage keys, in attachment order.
    pub keys: Vec<String>,

    /// Local previews matching `keys`.
    pub preview_urls: Vec<String>,
}

impl ArmedMedia {
    /// Returns true if nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
