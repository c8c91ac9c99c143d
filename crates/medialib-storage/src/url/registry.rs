use futures::future::BoxFuture;
use medialib_core::DiskConfig;
use std::collections::HashMap;
use std::sync::Arc;

use super::{DirectUrlGenerator, UrlError, UrlGenerator};

pub type UrlGeneratorFuture = BoxFuture<'static, Result<Arc<dyn UrlGenerator>, UrlError>>;

/// Builds a generator for one disk.
pub type UrlGeneratorConstructor = fn(DiskConfig) -> UrlGeneratorFuture;

/// Generator id → constructor. Populated once at startup; disks name the
/// generator they use with `url_generator`.
#[derive(Clone)]
pub struct UrlGeneratorRegistry {
    constructors: HashMap<String, UrlGeneratorConstructor>,
}

fn public(disk: DiskConfig) -> UrlGeneratorFuture {
    Box::pin(async move {
        Ok(Arc::new(DirectUrlGenerator::public(&disk)?) as Arc<dyn UrlGenerator>)
    })
}

fn s3(disk: DiskConfig) -> UrlGeneratorFuture {
    Box::pin(async move { Ok(Arc::new(DirectUrlGenerator::s3(&disk)?) as Arc<dyn UrlGenerator>) })
}

fn azure(disk: DiskConfig) -> UrlGeneratorFuture {
    Box::pin(async move {
        Ok(Arc::new(DirectUrlGenerator::azure(&disk)?) as Arc<dyn UrlGenerator>)
    })
}

#[cfg(feature = "storage-s3")]
fn s3_presigned(disk: DiskConfig) -> UrlGeneratorFuture {
    Box::pin(async move {
        let generator = super::S3PresignedUrlGenerator::from_disk(&disk).await?;
        Ok(Arc::new(generator) as Arc<dyn UrlGenerator>)
    })
}

impl UrlGeneratorRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: impl Into<String>, constructor: UrlGeneratorConstructor) {
        self.constructors.insert(id.into(), constructor);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    pub async fn build(&self, disk: &DiskConfig) -> Result<Arc<dyn UrlGenerator>, UrlError> {
        let id = disk.url_generator_id();
        let constructor = self
            .constructors
            .get(id)
            .ok_or_else(|| UrlError::UnknownGenerator(id.to_string()))?;
        constructor(disk.clone()).await
    }
}

impl Default for UrlGeneratorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("public", public);
        registry.register("s3", s3);
        registry.register("azure", azure);
        #[cfg(feature = "storage-s3")]
        registry.register("s3_presigned", s3_presigned);
        registry
    }
}
