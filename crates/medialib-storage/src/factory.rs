#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::url::{UrlGenerator, UrlGeneratorRegistry};
use crate::{MemoryStorage, Storage, StorageBackend, StorageError, StorageResult};
use medialib_core::{DiskConfig, LibraryConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Create a storage backend for one configured disk
pub async fn create_storage(disk: &DiskConfig) -> StorageResult<Arc<dyn Storage>> {
    match disk.driver {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = disk
                .bucket
                .clone()
                .ok_or_else(|| StorageError::Config("S3 disk requires a bucket".to_string()))?;
            let region = disk
                .region
                .clone()
                .ok_or_else(|| StorageError::Config("S3 disk requires a region".to_string()))?;
            let credentials = disk.key.clone().zip(disk.secret.clone());

            let storage = S3Storage::new(bucket, region, disk.endpoint.clone(), credentials)?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::Config(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let root = disk.root.clone().ok_or_else(|| {
                StorageError::Config("Local disk requires a root directory".to_string())
            })?;

            let storage = LocalStorage::new(root).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::Config(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        StorageBackend::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}

/// A named disk: where bytes live and how they are addressed.
#[derive(Clone)]
pub struct Disk {
    pub name: String,
    pub storage: Arc<dyn Storage>,
    pub urls: Arc<dyn UrlGenerator>,
}

/// Every configured disk, built once at startup.
#[derive(Clone)]
pub struct DiskRegistry {
    default: String,
    disks: HashMap<String, Disk>,
}

impl DiskRegistry {
    pub async fn from_config(
        config: &LibraryConfig,
        generators: &UrlGeneratorRegistry,
    ) -> StorageResult<Self> {
        let mut registry = Self {
            default: config.disk.clone(),
            disks: HashMap::new(),
        };

        for (name, disk) in &config.disks {
            let storage = create_storage(disk).await?;
            let urls = generators.build(disk).await.map_err(|e| {
                StorageError::Config(format!("Disk '{}': {}", name, e))
            })?;
            registry.insert(name.clone(), storage, urls);
            tracing::debug!(
                disk = %name,
                driver = %disk.driver,
                url_generator = disk.url_generator_id(),
                "Disk configured"
            );
        }

        if !registry.disks.contains_key(&registry.default) {
            return Err(StorageError::Config(format!(
                "Default disk '{}' is not configured",
                registry.default
            )));
        }

        Ok(registry)
    }

    /// Registry holding a single disk, which is also the default.
    pub fn single(
        name: impl Into<String>,
        storage: Arc<dyn Storage>,
        urls: Arc<dyn UrlGenerator>,
    ) -> Self {
        let name = name.into();
        let mut registry = Self {
            default: name.clone(),
            disks: HashMap::new(),
        };
        registry.insert(name, storage, urls);
        registry
    }

    pub fn insert(&mut self, name: String, storage: Arc<dyn Storage>, urls: Arc<dyn UrlGenerator>) {
        self.disks.insert(
            name.clone(),
            Disk {
                name,
                storage,
                urls,
            },
        );
    }

    pub fn default_disk(&self) -> &str {
        &self.default
    }

    pub fn get(&self, name: &str) -> StorageResult<&Disk> {
        self.disks
            .get(name)
            .ok_or_else(|| StorageError::Config(format!("Unknown disk '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DirectUrlGenerator;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn builds_local_disks_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = LibraryConfig::default();
        config.disks = BTreeMap::from([(
            "media".to_string(),
            DiskConfig::local(dir.path(), "https://cdn.example.com"),
        )]);

        let registry = DiskRegistry::from_config(&config, &UrlGeneratorRegistry::default())
            .await
            .unwrap();

        let disk = registry.get("media").unwrap();
        assert_eq!(disk.storage.backend_type(), StorageBackend::Local);
        assert_eq!(registry.default_disk(), "media");
        assert!(registry.get("archive").is_err());
    }

    #[tokio::test]
    async fn missing_default_disk_is_rejected() {
        let mut config = LibraryConfig::default();
        config.disk = "archive".to_string();
        let mut memory = DiskConfig::local("unused", "https://cdn.example.com");
        memory.driver = StorageBackend::Memory;
        config.disks = BTreeMap::from([("media".to_string(), memory)]);

        let result = DiskRegistry::from_config(&config, &UrlGeneratorRegistry::default()).await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[test]
    fn single_disk_is_default() {
        let registry = DiskRegistry::single(
            "memory",
            Arc::new(MemoryStorage::new()),
            Arc::new(DirectUrlGenerator::new("https://cdn.example.com")),
        );
        assert_eq!(registry.default_disk(), "memory");
        assert!(registry.get("memory").is_ok());
    }
}
