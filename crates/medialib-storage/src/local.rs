use crate::traits::{validate_key, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Disk backed by a directory; keys map to relative paths below it.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (and create if needed) the directory holding this disk.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Config(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `key`, refusing anything that lands outside the root once
    /// symlinks are resolved.
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let path = self.root.join(key.trim_end_matches('/'));

        let root = self
            .root
            .canonicalize()
            .map_err(|e| StorageError::Config(format!("cannot resolve disk root: {}", e)))?;
        match path.canonicalize() {
            Ok(real) if !real.starts_with(&root) => Err(StorageError::InvalidKey(format!(
                "{} points outside the disk",
                key
            ))),
            _ => Ok(path),
        }
    }

    async fn present(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let start = Instant::now();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let write = async {
            let mut out = fs::File::create(&path).await?;
            out.write_all(&data).await?;
            // Transformers may read the original from another process right away.
            out.sync_all().await
        };
        write
            .await
            .map_err(|e| StorageError::Write(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Object written to local disk"
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key)?;
        if !Self::present(&path).await {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let data = fs::read(&path)
            .await
            .map_err(|e| StorageError::Read(format!("{}: {}", path.display(), e)))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        if !Self::present(&path).await {
            return Ok(());
        }
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::Delete(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(key = %key, "Object removed from local disk");
        Ok(())
    }

    async fn delete_all(&self, prefix: &str) -> StorageResult<()> {
        let path = self.resolve(prefix)?;
        if !Self::present(&path).await {
            return Ok(());
        }

        let removed = if fs::metadata(&path).await?.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        removed.map_err(|e| StorageError::Delete(format!("{}: {}", path.display(), e)))?;

        tracing::info!(prefix = %prefix, "Objects removed from local disk");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        Ok(Self::present(&path).await)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
