//! Process-local storage backend.
//!
//! Holds objects in a map and records prefix deletions so callers can assert
//! on cleanup. Used by tests and by embedders that never leave one process.

use crate::traits::{validate_key, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    deleted_prefixes: Mutex<Vec<String>>,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every following `put` fail with `StorageError::Write`.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Number of `put` calls, successful or not.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects().get(key).cloned()
    }

    /// Prefixes passed to `delete_all`, in call order.
    pub fn deleted_prefixes(&self) -> Vec<String> {
        self.deleted_prefixes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Write(format!(
                "Memory storage rejected {}",
                key
            )));
        }
        self.objects().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        self.objects()
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.objects().remove(key);
        Ok(())
    }

    async fn delete_all(&self, prefix: &str) -> StorageResult<()> {
        validate_key(prefix)?;
        self.objects().retain(|key, _| !key.starts_with(prefix));
        self.deleted_prefixes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prefix.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.objects().contains_key(key))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_prefix_deletes() {
        let storage = MemoryStorage::new();
        storage
            .put("a/upload.jpg", Bytes::from_static(b"1"), "image/jpeg")
            .await
            .unwrap();
        storage
            .put("b/upload.jpg", Bytes::from_static(b"2"), "image/jpeg")
            .await
            .unwrap();

        storage.delete_all("a/").await.unwrap();

        assert_eq!(storage.keys(), vec!["b/upload.jpg".to_string()]);
        assert_eq!(storage.deleted_prefixes(), vec!["a/".to_string()]);
    }

    #[tokio::test]
    async fn failing_puts_store_nothing() {
        let storage = MemoryStorage::new();
        storage.fail_puts(true);

        let result = storage
            .put("a/upload.jpg", Bytes::from_static(b"1"), "image/jpeg")
            .await;

        assert!(matches!(result, Err(StorageError::Write(_))));
        assert_eq!(storage.put_count(), 1);
        assert!(storage.keys().is_empty());
    }
}
