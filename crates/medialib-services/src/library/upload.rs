use bytes::Bytes;
use chrono::Utc;
use std::time::Instant;
use uuid::Uuid;

use medialib_core::constants::DEFAULT_GROUP;
use medialib_core::models::{File, UploadAttributes};
use medialib_core::{extension_of, slugify, strip_extension, AppError, FileType, FileTypeConfig, QueuePolicy};
use medialib_processing::image::ImageProcessor;
use medialib_worker::{Dispatch, Invocation};

use super::MediaLibrary;

/// Bytes of an upload with the client's file name and the detected MIME type.
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub data: Bytes,
    pub filename: String,
    pub mime_type: String,
}

impl UploadSource {
    pub fn new(data: impl Into<Bytes>, filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Client extension, or the first configured extension listing the MIME type.
fn resolve_extension(filename: &str, mime_type: &str, config: &FileTypeConfig) -> String {
    let extension = extension_of(filename);
    if !extension.is_empty() {
        return extension;
    }
    config
        .mimes
        .iter()
        .find(|(_, mimes)| mimes.iter().any(|m| m == mime_type))
        .map(|(extension, _)| extension.clone())
        .unwrap_or_default()
}

impl MediaLibrary {
    /// Store an upload and schedule its transformations.
    ///
    /// Only classification, size and storage failures are returned. Failing
    /// transformations are logged; deferred ones are retried by the queue.
    #[tracing::instrument(skip(self, source, attributes), fields(filename = %source.filename, mime_type = %source.mime_type))]
    pub async fn upload_file(
        &self,
        source: UploadSource,
        attributes: UploadAttributes,
        disk: Option<&str>,
    ) -> Result<File, AppError> {
        let start = Instant::now();

        // 1. Classify
        let file_type = self
            .classifier
            .classify(&source.mime_type)
            .ok_or_else(|| AppError::UnsupportedMediaType(source.mime_type.clone()))?;
        let type_config = self.library.file_type(file_type).ok_or_else(|| {
            AppError::Config(format!("No configuration for {} files", file_type))
        })?;

        // 2. Enforce the size limit before anything is written
        let size = source.data.len() as u64;
        if size > type_config.max_file_size {
            tracing::debug!(size_bytes = size, max = type_config.max_file_size, "Upload too large");
            return Err(AppError::PayloadTooLarge {
                file_type: file_type.to_string(),
                size,
                max: type_config.max_file_size,
            });
        }

        let disk_name = disk.unwrap_or(self.disks.default_disk()).to_string();
        let disk = self.disk(&disk_name)?;

        // 3. Read dimensions of images
        let dimensions = match file_type {
            FileType::Image => ImageProcessor::get_dimensions(&source.data),
            _ => None,
        };

        // 4. Persist the record, not yet completed
        let extension = resolve_extension(&source.filename, &source.mime_type, type_config);
        let file = self
            .stores
            .files
            .insert(&new_file(&source, &attributes, file_type, &disk_name, extension, dimensions))
            .await?;

        // 5. Write the original
        if let Err(e) = disk
            .storage
            .put(&file.upload_key(), source.data.clone(), &source.mime_type)
            .await
        {
            tracing::error!(error = %e, file_id = %file.id, "Failed to store original");
            if let Err(cleanup) = self.stores.files.delete(file.id).await {
                tracing::error!(
                    error = %cleanup,
                    file_id = %file.id,
                    "Failed to remove record of unstored upload"
                );
            }
            return Err(AppError::Storage(e.to_string()));
        }

        // 6. Durable write confirmed
        let file = self
            .stores
            .files
            .mark_completed(file.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} vanished during upload", file.id)))?;

        tracing::info!(
            file_id = %file.id,
            file_type = %file.file_type,
            disk = %file.disk,
            size_bytes = file.size,
            duration_ms = start.elapsed().as_millis() as u64,
            "File uploaded"
        );

        // 7. Hand the transformations to the executor
        self.dispatch_transformations(&file, type_config.wait_for_default_transformation)
            .await;

        Ok(self.stores.files.get(file.id).await?.unwrap_or(file))
    }

    async fn dispatch_transformations(&self, file: &File, wait_for_default: bool) {
        let plan = self.scheduler.plan_for(file);

        for entry in plan.iter() {
            let queue = if wait_for_default && entry.promotes() {
                QueuePolicy::Inline
            } else {
                entry.descriptor.queued.clone()
            };
            let invocation = Invocation::new(file.id, entry.name.clone(), queue);

            match self.executor.execute(&invocation).await {
                Ok(Dispatch::Inline(result)) => {
                    tracing::debug!(transformation = %entry.name, result = %result, "Inline transformation done")
                }
                Ok(Dispatch::Queued(job)) => {
                    tracing::debug!(transformation = %entry.name, job_id = %job.id, "Transformation deferred")
                }
                Err(e) => tracing::error!(
                    error = %e,
                    file_id = %file.id,
                    transformation = %entry.name,
                    "Transformation failed"
                ),
            }
        }
    }
}

fn new_file(
    source: &UploadSource,
    attributes: &UploadAttributes,
    file_type: FileType,
    disk: &str,
    extension: String,
    dimensions: Option<(u32, u32)>,
) -> File {
    let now = Utc::now();
    let group = attributes
        .group
        .clone()
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string());

    File {
        id: Uuid::new_v4(),
        name: attributes.name.clone(),
        caption: attributes.caption.clone(),
        file_type,
        file_group: group,
        disk: disk.to_string(),
        filename: slugify(strip_extension(&source.filename, &extension)),
        extension,
        mime_type: source.mime_type.clone(),
        size: source.data.len() as i64,
        width: dimensions.map(|(w, _)| w as i32),
        height: dimensions.map(|(_, h)| h as i32),
        is_hidden: attributes.is_hidden,
        completed: false,
        properties: attributes
            .properties
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
        owner_id: attributes.owner_id,
        user_id: attributes.user_id,
        category_id: attributes.category_id,
        created_at: now,
        updated_at: now,
    }
}
