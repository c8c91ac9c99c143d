use uuid::Uuid;

use medialib_core::AppError;
use medialib_worker::{Dispatch, Invocation};

use super::MediaLibrary;

impl MediaLibrary {
    /// Delete a file with its transformations and attachments, then schedule
    /// removal of its stored objects. Returns `false` when it did not exist.
    #[tracing::instrument(skip(self))]
    pub async fn delete_file(&self, file_id: Uuid) -> Result<bool, AppError> {
        let Some(file) = self.stores.files.get(file_id).await? else {
            return Ok(false);
        };

        if !self.stores.files.delete(file_id).await? {
            return Ok(false);
        }

        // The record is gone either way; a failed enqueue only leaks bytes.
        match self.executor.schedule_cleanup(file.id, &file.disk).await {
            Ok(job) => tracing::info!(job_id = %job.id, disk = %file.disk, "File deleted, cleanup scheduled"),
            Err(e) => tracing::error!(
                error = %e,
                disk = %file.disk,
                prefix = %file.storage_prefix(),
                "File deleted but cleanup could not be scheduled"
            ),
        }

        Ok(true)
    }

    /// Run one configured transformation of a file again, on its own lane.
    /// The result overwrites the previous record or promotion.
    #[tracing::instrument(skip(self))]
    pub async fn retransform(&self, file_id: Uuid, name: &str) -> Result<Dispatch, AppError> {
        let file = self.get_file(file_id).await?;
        let descriptor = self
            .scheduler
            .descriptor(file.file_type, name)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No transformation '{}' configured for {} files",
                    name, file.file_type
                ))
            })?;

        let invocation = Invocation::new(file.id, name, descriptor.queued);
        Ok(self.executor.execute(&invocation).await?)
    }
}
