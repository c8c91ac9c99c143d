//! Store trait abstractions
//!
//! The services and the worker depend on these traits rather than on the
//! concrete repositories, so the pipeline can run against the in-memory
//! stores in tests without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use medialib_core::models::{
    CanonicalUpdate, File, FileQuery, Job, NewJob, Transformation, TransformationOutput,
};

use crate::db::{AttachableRepository, FileRepository, JobRepository, TransformationRepository};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert(&self, file: &File) -> Result<File>;

    async fn get(&self, id: Uuid) -> Result<Option<File>>;

    async fn mark_completed(&self, id: Uuid) -> Result<Option<File>>;

    /// Overwrite canonical fields. `None` when the file is gone.
    async fn promote(&self, id: Uuid, update: &CanonicalUpdate) -> Result<Option<File>>;

    /// Delete the file together with its transformations and attachments.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn list(&self, query: &FileQuery) -> Result<Vec<File>>;
}

#[async_trait]
pub trait TransformationStore: Send + Sync {
    /// Insert or replace by `(file_id, output.name)`. `None` when the file is gone.
    async fn upsert(
        &self,
        file_id: Uuid,
        output: &TransformationOutput,
    ) -> Result<Option<Transformation>>;

    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<Transformation>>;

    async fn find(&self, file_id: Uuid, name: &str) -> Result<Option<Transformation>>;
}

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn attach(&self, file_id: Uuid, attachable_type: &str, attachable_id: Uuid)
        -> Result<()>;

    async fn detach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<bool>;

    async fn sync(&self, attachable_type: &str, attachable_id: Uuid, file_ids: &[Uuid])
        -> Result<()>;

    async fn files_for(&self, attachable_type: &str, attachable_id: Uuid) -> Result<Vec<Uuid>>;

    async fn attached_ids(&self, file_id: Uuid, attachable_type: &str) -> Result<Vec<Uuid>>;

    async fn attachment_count(&self, file_id: Uuid) -> Result<i64>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: &NewJob) -> Result<Job>;

    /// Claim the oldest runnable pending job on one of `queues`, counting an attempt.
    async fn claim_next(&self, queues: &[String]) -> Result<Option<Job>>;

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<()>;

    async fn reschedule(
        &self,
        id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<()>;

    async fn has_active_jobs(&self, file_id: Uuid) -> Result<bool>;

    async fn reap_stale(&self, grace_secs: i64) -> Result<u64>;
}

// Implementations for concrete repository types

#[async_trait]
impl FileStore for FileRepository {
    async fn insert(&self, file: &File) -> Result<File> {
        FileRepository::insert(self, file).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<File>> {
        FileRepository::get(self, id).await
    }

    async fn mark_completed(&self, id: Uuid) -> Result<Option<File>> {
        FileRepository::mark_completed(self, id).await
    }

    async fn promote(&self, id: Uuid, update: &CanonicalUpdate) -> Result<Option<File>> {
        FileRepository::promote(self, id, update).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        FileRepository::delete(self, id).await
    }

    async fn list(&self, query: &FileQuery) -> Result<Vec<File>> {
        FileRepository::list(self, query).await
    }
}

#[async_trait]
impl TransformationStore for TransformationRepository {
    async fn upsert(
        &self,
        file_id: Uuid,
        output: &TransformationOutput,
    ) -> Result<Option<Transformation>> {
        TransformationRepository::upsert(self, file_id, output).await
    }

    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<Transformation>> {
        TransformationRepository::list_for_file(self, file_id).await
    }

    async fn find(&self, file_id: Uuid, name: &str) -> Result<Option<Transformation>> {
        TransformationRepository::find(self, file_id, name).await
    }
}

#[async_trait]
impl AttachmentStore for AttachableRepository {
    async fn attach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<()> {
        AttachableRepository::attach(self, file_id, attachable_type, attachable_id).await
    }

    async fn detach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<bool> {
        AttachableRepository::detach(self, file_id, attachable_type, attachable_id).await
    }

    async fn sync(
        &self,
        attachable_type: &str,
        attachable_id: Uuid,
        file_ids: &[Uuid],
    ) -> Result<()> {
        AttachableRepository::sync(self, attachable_type, attachable_id, file_ids).await
    }

    async fn files_for(&self, attachable_type: &str, attachable_id: Uuid) -> Result<Vec<Uuid>> {
        AttachableRepository::files_for(self, attachable_type, attachable_id).await
    }

    async fn attached_ids(&self, file_id: Uuid, attachable_type: &str) -> Result<Vec<Uuid>> {
        AttachableRepository::attached_ids(self, file_id, attachable_type).await
    }

    async fn attachment_count(&self, file_id: Uuid) -> Result<i64> {
        AttachableRepository::attachment_count(self, file_id).await
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn enqueue(&self, job: &NewJob) -> Result<Job> {
        JobRepository::enqueue(self, job).await
    }

    async fn claim_next(&self, queues: &[String]) -> Result<Option<Job>> {
        JobRepository::claim_next(self, queues).await
    }

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        JobRepository::mark_completed(self, id, result).await
    }

    async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<()> {
        JobRepository::mark_failed(self, id, error).await
    }

    async fn reschedule(
        &self,
        id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<()> {
        JobRepository::reschedule(self, id, run_at, error).await
    }

    async fn has_active_jobs(&self, file_id: Uuid) -> Result<bool> {
        JobRepository::has_active_jobs(self, file_id).await
    }

    async fn reap_stale(&self, grace_secs: i64) -> Result<u64> {
        JobRepository::reap_stale(self, grace_secs).await
    }
}
