use crate::traits::{validate_key, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use std::time::Instant;

/// Disk backed by an S3 bucket, or any S3-compatible service when an
/// endpoint is given (MinIO, R2, ...).
#[derive(Clone, Debug)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// Credentials fall back to the usual `AWS_*` environment variables.
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        credentials: Option<(String, String)>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some((access_key, secret)) = credentials {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret);
        }
        if let Some(endpoint) = endpoint_url {
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("bucket {}: {}", bucket, e)))?;
        Ok(Self { store, bucket })
    }

    fn failed(&self, op: &'static str, key: &str, err: ObjectStoreError) -> ObjectStoreError {
        tracing::error!(error = %err, bucket = %self.bucket, key = %key, op, "S3 request failed");
        err
    }
}

fn is_missing(err: &ObjectStoreError) -> bool {
    matches!(err, ObjectStoreError::NotFound { .. })
}

#[async_trait]
impl Storage for S3Storage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let start = Instant::now();
        let size = data.len();

        self.store
            .put(&Path::from(key), PutPayload::from(data))
            .await
            .map_err(|e| StorageError::Write(self.failed("put", key, e).to_string()))?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_millis() as u64,
            "Object written to bucket"
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let object = match self.store.get(&Path::from(key)).await {
            Ok(object) => object,
            Err(e) if is_missing(&e) => return Err(StorageError::NotFound(key.to_string())),
            Err(e) => return Err(StorageError::Read(self.failed("get", key, e).to_string())),
        };
        object
            .bytes()
            .await
            .map_err(|e| StorageError::Read(self.failed("get", key, e).to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        match self.store.delete(&Path::from(key)).await {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(StorageError::Delete(self.failed("delete", key, e).to_string())),
        }
    }

    async fn delete_all(&self, prefix: &str) -> StorageResult<()> {
        validate_key(prefix)?;
        let location = Path::from(prefix.trim_end_matches('/'));

        let objects: Vec<_> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|e| StorageError::Backend(self.failed("list", prefix, e).to_string()))?;

        for object in &objects {
            if let Err(e) = self.store.delete(&object.location).await {
                if !is_missing(&e) {
                    let key = object.location.to_string();
                    return Err(StorageError::Delete(self.failed("delete", &key, e).to_string()));
                }
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            prefix = %prefix,
            objects = objects.len(),
            "Objects removed from bucket"
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(StorageError::Backend(self.failed("head", key, e).to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
