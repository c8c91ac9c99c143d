//! The `Storage` trait implemented by every disk backend.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to write object: {0}")]
    Write(String),

    #[error("Failed to read object: {0}")]
    Read(String),

    #[error("Failed to delete object: {0}")]
    Delete(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Disk misconfigured: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte storage for one named disk.
///
/// Keys follow `{file_id}/{name}.{extension}`; `upload` is the name of the
/// canonical original. A successful `put` must be visible to a subsequent
/// `get` from any process (transformers read the original right after upload).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Read the object stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Remove one object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Remove every object whose key starts with `prefix`.
    async fn delete_all(&self, prefix: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    fn backend_type(&self) -> StorageBackend;
}

/// Rejects keys that could escape a backend's namespace.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "key is empty, absolute or contains a traversal".to_string(),
        ));
    }
    Ok(())
}
