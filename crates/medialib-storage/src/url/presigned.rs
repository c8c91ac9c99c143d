use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use medialib_core::constants::{PRESIGNED_CACHE_CONTROL, PRESIGNED_URL_EXPIRY_SECS};
use medialib_core::models::{File, Transformation};
use medialib_core::DiskConfig;
use std::sync::Arc;
use std::time::Duration;

use super::{ObjectRef, UrlError, UrlGenerator};

/// Parameters of a pre-signed GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignRequest {
    pub key: String,
    pub content_type: String,
    pub cache_control: String,
    pub content_disposition: Option<String>,
    pub expires_in: Duration,
}

/// Signs GET requests with response header overrides.
#[async_trait]
pub trait PresignGet: Send + Sync {
    async fn presign_get(&self, request: &PresignRequest) -> Result<String, UrlError>;
}

/// SigV4 pre-signing through the AWS SDK.
#[derive(Clone, Debug)]
pub struct AwsPresigner {
    client: Client,
    bucket: String,
}

impl AwsPresigner {
    pub async fn new(disk: &DiskConfig) -> Result<Self, UrlError> {
        let region = disk
            .region
            .clone()
            .ok_or_else(|| UrlError::Config("s3_presigned requires a region".to_string()))?;
        let bucket = disk
            .bucket
            .clone()
            .ok_or_else(|| UrlError::Config("s3_presigned requires a bucket".to_string()))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));
        if let (Some(key), Some(secret)) = (&disk.key, &disk.secret) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "medialib",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        // S3-compatible providers need path-style addressing
        if let Some(endpoint) = &disk.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
        })
    }
}

#[async_trait]
impl PresignGet for AwsPresigner {
    async fn presign_get(&self, request: &PresignRequest) -> Result<String, UrlError> {
        let presigning_config = PresigningConfig::expires_in(request.expires_in)
            .map_err(|e| UrlError::Signing(e.to_string()))?;

        let mut operation = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .response_cache_control(&request.cache_control)
            .response_content_type(&request.content_type);
        if let Some(disposition) = &request.content_disposition {
            operation = operation.response_content_disposition(disposition);
        }

        let presigned = operation
            .presigned(presigning_config)
            .await
            .map_err(|e| UrlError::Signing(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

/// Temporary private URLs; the only generator that supports forced downloads.
pub struct S3PresignedUrlGenerator {
    presigner: Arc<dyn PresignGet>,
    expires_in: Duration,
}

impl S3PresignedUrlGenerator {
    pub fn new(presigner: Arc<dyn PresignGet>, expires_in: Duration) -> Self {
        Self {
            presigner,
            expires_in,
        }
    }

    pub async fn from_disk(disk: &DiskConfig) -> Result<Self, UrlError> {
        let presigner = AwsPresigner::new(disk).await?;
        let expires_in =
            Duration::from_secs(disk.presigned_expires_secs.unwrap_or(PRESIGNED_URL_EXPIRY_SECS));
        Ok(Self::new(Arc::new(presigner), expires_in))
    }
}

#[async_trait]
impl UrlGenerator for S3PresignedUrlGenerator {
    async fn url_for(
        &self,
        file: &File,
        transformation: Option<&Transformation>,
        full_preview: bool,
        download: bool,
    ) -> Result<String, UrlError> {
        let object = ObjectRef::resolve(file, transformation, full_preview);
        let request = PresignRequest {
            content_disposition: download.then(|| object.content_disposition(file)),
            key: object.key,
            content_type: object.mime_type,
            cache_control: PRESIGNED_CACHE_CONTROL.to_string(),
            expires_in: self.expires_in,
        };

        self.presigner.presign_get(&request).await
    }
}
