use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use medialib_core::models::{file_prefix, JobPayload, TransformationOutput};
use medialib_core::JobError;
use medialib_db::TransformationStore;
use medialib_processing::{TransformContext, TransformationSink};
use medialib_worker::JobHandlerContext;

use super::MediaLibrary;
use crate::scheduler::MergeOutcome;

/// Records side renditions as Transformation rows.
pub struct StoreSink {
    transformations: Arc<dyn TransformationStore>,
}

impl StoreSink {
    pub fn new(transformations: Arc<dyn TransformationStore>) -> Self {
        Self { transformations }
    }
}

#[async_trait]
impl TransformationSink for StoreSink {
    async fn record(&self, file_id: Uuid, output: TransformationOutput) -> Result<()> {
        if self.transformations.upsert(file_id, &output).await?.is_none() {
            tracing::info!(
                file_id = %file_id,
                transformation = %output.name,
                "File was deleted, side rendition dropped"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandlerContext for MediaLibrary {
    async fn dispatch_job(self: Arc<Self>, payload: &JobPayload) -> Result<serde_json::Value> {
        match payload {
            JobPayload::Transform { file_id, name } => {
                let outcome = self.run_transformation(*file_id, name).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            JobPayload::DeleteFile { file_id, disk } => {
                let prefix = self.delete_objects(*file_id, disk).await?;
                Ok(json!({ "deleted_prefix": prefix }))
            }
        }
    }
}

impl MediaLibrary {
    /// Run one configured transformation of a file and merge its result.
    #[tracing::instrument(skip_all, fields(file_id = %file_id, transformation = %name))]
    pub(crate) async fn run_transformation(&self, file_id: Uuid, name: &str) -> Result<MergeOutcome> {
        let start = Instant::now();

        let Some(file) = self.stores.files.get(file_id).await? else {
            tracing::info!("File no longer exists, invocation dropped");
            return Ok(MergeOutcome::Orphaned);
        };

        let descriptor = self
            .scheduler
            .descriptor(file.file_type, name)
            .ok_or_else(|| {
                JobError::unrecoverable(anyhow!(
                    "No transformation '{}' configured for {} files",
                    name,
                    file.file_type
                ))
            })?;
        let transformer = self.transformers.get(&descriptor.transformer).ok_or_else(|| {
            JobError::unrecoverable(anyhow!("Unknown transformer '{}'", descriptor.transformer))
        })?;
        let disk = self
            .disks
            .get(&file.disk)
            .map_err(|e| JobError::unrecoverable(anyhow!(e)))?;

        // Only needed by transformers handing the original to a remote service.
        let source_url = match disk.urls.url_for(&file, None, false, false).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!(error = %e, "No source URL for file");
                None
            }
        };

        let ctx = TransformContext {
            file,
            name: name.to_string(),
            descriptor: descriptor.clone(),
            storage: disk.storage.clone(),
            source_url,
            sink: self.sink.clone(),
        };

        let output = transformer.transform(&ctx).await?;
        let outcome = self
            .scheduler
            .merge(
                &ctx.file,
                name,
                &descriptor,
                output,
                &self.stores,
                disk.storage.as_ref(),
            )
            .await
            .context("Failed to merge transformation result")?;

        tracing::info!(
            transformer = %descriptor.transformer,
            outcome = ?outcome,
            duration_ms = start.elapsed().as_millis() as u64,
            "Transformation finished"
        );
        Ok(outcome)
    }

    /// Remove every stored object of a deleted file.
    #[tracing::instrument(skip_all, fields(file_id = %file_id, disk = %disk))]
    async fn delete_objects(&self, file_id: Uuid, disk: &str) -> Result<String> {
        let disk = self
            .disks
            .get(disk)
            .map_err(|e| JobError::unrecoverable(anyhow!(e)))?;
        let prefix = file_prefix(file_id);

        disk.storage
            .delete_all(&prefix)
            .await
            .with_context(|| format!("Failed to delete objects under '{}'", prefix))?;

        tracing::info!(disk = %disk.name, prefix = %prefix, "Stored objects removed");
        Ok(prefix)
    }
}
