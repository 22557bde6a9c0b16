mod cloudinary;
mod in_memory;
mod local_fs;
mod timeout;

pub use cloudinary::{CloudinaryConfig, CloudinaryStorage, SignatureAlgorithm};
pub use in_memory::InMemoryStorage;
pub use local_fs::LocalFileStorage;
pub use timeout::TimeoutStorage;

use async_trait::async_trait;
use mime::Mime;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Hard cap on how many records a single listing returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// A file part that passed intake validation and is ready to be persisted.
#[derive(Debug)]
pub struct FileData {
    pub bytes: Vec<u8>,
    pub content_type: Option<Mime>,
    pub filename: String,
}

impl FileData {
    /// Lowercased extension of the original filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
    }
}

/// The canonical record of one stored object, in the shape the API returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    #[serde(rename = "name")]
    pub original_name: String,
    pub url: String,
    pub public_id: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "size", skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed storage payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Backend-agnostic capability every storage provider implements.
///
/// `delete` answers `Ok(false)` when nothing is stored under the id, so callers
/// can tell a miss apart from a failing backend.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn store(&self, file_data: FileData) -> Result<StoredFile, StorageError>;
    async fn list(&self, limit: usize) -> Result<Vec<StoredFile>, StorageError>;
    async fn delete(&self, public_id: &str) -> Result<bool, StorageError>;
}

/// Broad classification of a MIME type, in the vocabulary hosted media APIs use.
pub fn resource_type_of(content_type: Option<&Mime>) -> &'static str {
    match content_type.map(|m| m.type_()) {
        Some(name) if name == mime::IMAGE => "image",
        Some(name) if name == mime::VIDEO => "video",
        _ => "raw",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> FileData {
        FileData {
            bytes: Vec::new(),
            content_type: None,
            filename: name.to_string(),
        }
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file("Report.PDF").extension().as_deref(), Some("pdf"));
        assert_eq!(file("archive.tar.gz").extension().as_deref(), Some("gz"));
    }

    #[test]
    fn extension_missing() {
        assert_eq!(file("README").extension(), None);
        assert_eq!(file(".env").extension(), None);
        assert_eq!(file("odd.t\\xt").extension(), None);
    }

    #[test]
    fn resource_type_buckets() {
        assert_eq!(resource_type_of(Some(&mime::IMAGE_PNG)), "image");
        assert_eq!(resource_type_of(Some(&"video/mp4".parse().unwrap())), "video");
        assert_eq!(resource_type_of(Some(&mime::APPLICATION_PDF)), "raw");
        assert_eq!(resource_type_of(None), "raw");
    }

    #[test]
    fn stored_file_serializes_in_api_shape() {
        let record = StoredFile {
            original_name: "note.txt".to_string(),
            url: "/uploads/1.txt".to_string(),
            public_id: "1.txt".to_string(),
            resource_type: None,
            content_type: Some("text/plain".to_string()),
            size_bytes: Some(10),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "name": "note.txt",
                "url": "/uploads/1.txt",
                "public_id": "1.txt",
                "content_type": "text/plain",
                "size": 10
            })
        );
    }
}
