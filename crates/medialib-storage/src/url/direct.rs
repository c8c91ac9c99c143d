use async_trait::async_trait;
use medialib_core::models::{File, Transformation};
use medialib_core::DiskConfig;

use super::{ObjectRef, UrlError, UrlGenerator};

/// `{base}/{key}` URLs for publicly readable objects.
#[derive(Debug, Clone)]
pub struct DirectUrlGenerator {
    base_url: String,
}

impl DirectUrlGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base taken from the disk's `url`.
    pub fn public(disk: &DiskConfig) -> Result<Self, UrlError> {
        disk.url
            .as_deref()
            .map(Self::new)
            .ok_or_else(|| UrlError::Config("public URL generator requires a disk url".to_string()))
    }

    /// `https://s3.{region}.amazonaws.com/{bucket}`
    pub fn s3(disk: &DiskConfig) -> Result<Self, UrlError> {
        let region = required(&disk.region, "s3", "region")?;
        let bucket = required(&disk.bucket, "s3", "bucket")?;
        Ok(Self::new(format!(
            "https://s3.{}.amazonaws.com/{}",
            region, bucket
        )))
    }

    /// `https://{account}.blob.core.windows.net/{container}`
    pub fn azure(disk: &DiskConfig) -> Result<Self, UrlError> {
        let account = required(&disk.account, "azure", "account")?;
        let container = required(&disk.container, "azure", "container")?;
        Ok(Self::new(format!(
            "https://{}.blob.core.windows.net/{}",
            account, container
        )))
    }
}

fn required<'a>(
    value: &'a Option<String>,
    generator: &str,
    field: &str,
) -> Result<&'a str, UrlError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| UrlError::Config(format!("{} URL generator requires {}", generator, field)))
}

#[async_trait]
impl UrlGenerator for DirectUrlGenerator {
    async fn url_for(
        &self,
        file: &File,
        transformation: Option<&Transformation>,
        full_preview: bool,
        download: bool,
    ) -> Result<String, UrlError> {
        if download {
            return Err(UrlError::Unsupported(
                "forced download requires a pre-signed URL generator".to_string(),
            ));
        }

        let object = ObjectRef::resolve(file, transformation, full_preview);
        Ok(format!("{}/{}", self.base_url, object.key))
    }
}
