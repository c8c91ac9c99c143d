//! In-memory stores.
//!
//! [`MemoryStore`] keeps files, transformations and attachments in one shared
//! state so deleting a file cascades the same way the foreign keys do in
//! PostgreSQL, and a transformation written for a deleted file is dropped.
//! [`MemoryJobStore`] is a process-local job table.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use medialib_core::models::{
    Attachment, CanonicalUpdate, File, FileQuery, Job, JobStatus, NewJob, Transformation,
    TransformationOutput,
};

use crate::stores::{AttachmentStore, FileStore, JobStore, TransformationStore};

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<Uuid, File>,
    transformations: Vec<Transformation>,
    attachments: Vec<Attachment>,
    next_transformation_id: i32,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    promotions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `promote` calls that hit an existing file.
    pub fn promotion_count(&self) -> usize {
        self.promotions.load(Ordering::SeqCst)
    }

    pub fn transformation_count(&self) -> usize {
        self.state().transformations.len()
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn insert(&self, file: &File) -> Result<File> {
        let mut state = self.state();
        if state.files.contains_key(&file.id) {
            return Err(anyhow::anyhow!("File {} already exists", file.id));
        }
        state.files.insert(file.id, file.clone());
        Ok(file.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<File>> {
        Ok(self.state().files.get(&id).cloned())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<Option<File>> {
        let mut state = self.state();
        Ok(state.files.get_mut(&id).map(|file| {
            file.completed = true;
            file.updated_at = Utc::now();
            file.clone()
        }))
    }

    async fn promote(&self, id: Uuid, update: &CanonicalUpdate) -> Result<Option<File>> {
        let mut state = self.state();
        let Some(file) = state.files.get_mut(&id) else {
            return Ok(None);
        };
        file.extension = update.extension.clone();
        file.mime_type = update.mime_type.clone();
        file.size = update.size;
        file.width = update.width;
        file.height = update.height;
        file.updated_at = Utc::now();
        self.promotions.fetch_add(1, Ordering::SeqCst);
        Ok(Some(file.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state();
        if state.files.remove(&id).is_none() {
            return Ok(false);
        }
        state.transformations.retain(|t| t.file_id != id);
        state.attachments.retain(|a| a.file_id != id);
        Ok(true)
    }

    async fn list(&self, query: &FileQuery) -> Result<Vec<File>> {
        let state = self.state();
        let mut files: Vec<File> = state
            .files
            .values()
            .filter(|file| query.matches(file))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.unwrap_or(50).max(0) as usize;
        Ok(files.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl TransformationStore for MemoryStore {
    async fn upsert(
        &self,
        file_id: Uuid,
        output: &TransformationOutput,
    ) -> Result<Option<Transformation>> {
        let mut state = self.state();
        if !state.files.contains_key(&file_id) {
            return Ok(None);
        }

        let now = Utc::now();
        if let Some(existing) = state
            .transformations
            .iter_mut()
            .find(|t| t.file_id == file_id && t.name == output.name)
        {
            existing.file_type = output.file_type;
            existing.disk = output.disk.clone();
            existing.filename = output.filename.clone();
            existing.extension = output.extension.clone();
            existing.mime_type = output.mime_type.clone();
            existing.size = output.size;
            existing.width = output.width;
            existing.height = output.height;
            existing.completed = true;
            existing.updated_at = now;
            return Ok(Some(existing.clone()));
        }

        state.next_transformation_id += 1;
        let transformation = Transformation {
            id: state.next_transformation_id,
            file_id,
            name: output.name.clone(),
            file_type: output.file_type,
            disk: output.disk.clone(),
            filename: output.filename.clone(),
            extension: output.extension.clone(),
            mime_type: output.mime_type.clone(),
            size: output.size,
            width: output.width,
            height: output.height,
            completed: true,
            properties: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        state.transformations.push(transformation.clone());
        Ok(Some(transformation))
    }

    async fn list_for_file(&self, file_id: Uuid) -> Result<Vec<Transformation>> {
        Ok(self
            .state()
            .transformations
            .iter()
            .filter(|t| t.file_id == file_id)
            .cloned()
            .collect())
    }

    async fn find(&self, file_id: Uuid, name: &str) -> Result<Option<Transformation>> {
        Ok(self
            .state()
            .transformations
            .iter()
            .find(|t| t.file_id == file_id && t.name == name && t.completed)
            .cloned())
    }
}

#[async_trait]
impl AttachmentStore for MemoryStore {
    async fn attach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<()> {
        let mut state = self.state();
        if !state.files.contains_key(&file_id) {
            return Err(anyhow::anyhow!("File {} does not exist", file_id));
        }
        let exists = state.attachments.iter().any(|a| {
            a.file_id == file_id
                && a.attachable_type == attachable_type
                && a.attachable_id == attachable_id
        });
        if !exists {
            state.attachments.push(Attachment {
                file_id,
                attachable_type: attachable_type.to_string(),
                attachable_id,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn detach(
        &self,
        file_id: Uuid,
        attachable_type: &str,
        attachable_id: Uuid,
    ) -> Result<bool> {
        let mut state = self.state();
        let before = state.attachments.len();
        state.attachments.retain(|a| {
            !(a.file_id == file_id
                && a.attachable_type == attachable_type
                && a.attachable_id == attachable_id)
        });
        Ok(state.attachments.len() < before)
    }

    async fn sync(
        &self,
        attachable_type: &str,
        attachable_id: Uuid,
        file_ids: &[Uuid],
    ) -> Result<()> {
        if let Some(missing) = {
            let state = self.state();
            file_ids
                .iter()
                .find(|id| !state.files.contains_key(id))
                .copied()
        } {
            return Err(anyhow::anyhow!("File {} does not exist", missing));
        }

        self.state().attachments.retain(|a| {
            !(a.attachable_type == attachable_type
                && a.attachable_id == attachable_id
                && !file_ids.contains(&a.file_id))
        });
        for file_id in file_ids {
            self.attach(*file_id, attachable_type, attachable_id).await?;
        }
        Ok(())
    }

    async fn files_for(&self, attachable_type: &str, attachable_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .state()
            .attachments
            .iter()
            .filter(|a| a.attachable_type == attachable_type && a.attachable_id == attachable_id)
            .map(|a| a.file_id)
            .collect())
    }

    async fn attached_ids(&self, file_id: Uuid, attachable_type: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .state()
            .attachments
            .iter()
            .filter(|a| a.file_id == file_id && a.attachable_type == attachable_type)
            .map(|a| a.attachable_id)
            .collect())
    }

    async fn attachment_count(&self, file_id: Uuid) -> Result<i64> {
        Ok(self
            .state()
            .attachments
            .iter()
            .filter(|a| a.file_id == file_id)
            .count() as i64)
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of every job, in enqueue order.
    pub fn all(&self) -> Vec<Job> {
        self.jobs().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs().iter().find(|job| job.id == id).cloned()
    }

    pub fn with_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs()
            .iter()
            .filter(|job| job.status == status)
            .cloned()
            .collect()
    }

    /// Make every pending job runnable now, skipping retry backoff.
    pub fn release_backoff(&self) {
        let now = Utc::now();
        for job in self.jobs().iter_mut() {
            if job.status == JobStatus::Pending && job.run_at > now {
                job.run_at = now;
            }
        }
    }

    fn update(&self, id: Uuid, apply: impl FnOnce(&mut Job)) -> Result<()> {
        let mut jobs = self.jobs();
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| anyhow::anyhow!("Job {} not found", id))?;
        apply(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: &NewJob) -> Result<Job> {
        let now = Utc::now();
        let created = Job {
            id: Uuid::new_v4(),
            queue: job.queue.clone(),
            kind: job.payload.kind().to_string(),
            payload: serde_json::to_value(&job.payload)?,
            file_id: Some(job.payload.file_id()),
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            timeout_seconds: job.timeout_seconds,
            run_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs().push(created.clone());
        Ok(created)
    }

    async fn claim_next(&self, queues: &[String]) -> Result<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs();
        let next = jobs
            .iter_mut()
            .filter(|job| {
                job.status == JobStatus::Pending && job.run_at <= now && queues.contains(&job.queue)
            })
            .min_by_key(|job| (job.run_at, job.created_at));

        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.started_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
        })
    }

    async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<()> {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.result = Some(error);
            job.completed_at = Some(Utc::now());
        })
    }

    async fn reschedule(
        &self,
        id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<()> {
        self.update(id, |job| {
            job.status = JobStatus::Pending;
            job.run_at = run_at;
            job.result = Some(error);
            job.started_at = None;
        })
    }

    async fn has_active_jobs(&self, file_id: Uuid) -> Result<bool> {
        Ok(self
            .jobs()
            .iter()
            .any(|job| job.file_id == Some(file_id) && job.is_active()))
    }

    async fn reap_stale(&self, grace_secs: i64) -> Result<u64> {
        let now = Utc::now();
        let mut reaped = 0;
        for job in self.jobs().iter_mut() {
            let Some(started_at) = job.started_at else {
                continue;
            };
            let deadline =
                started_at + Duration::seconds(i64::from(job.timeout_seconds) + grace_secs);
            if job.status == JobStatus::Running && deadline < now {
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.run_at = now;
                job.updated_at = now;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medialib_core::models::JobPayload;
    use medialib_core::FileType;

    fn file() -> File {
        let now = Utc::now();
        File {
            id: Uuid::new_v4(),
            name: None,
            caption: None,
            file_type: FileType::Image,
            file_group: "default".to_string(),
            disk: "media".to_string(),
            filename: "photo".to_string(),
            extension: "png".to_string(),
            mime_type: "image/png".to_string(),
            size: 10,
            width: Some(4),
            height: Some(4),
            is_hidden: false,
            completed: false,
            properties: serde_json::json!({}),
            owner_id: None,
            user_id: None,
            category_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn thumb_output() -> TransformationOutput {
        TransformationOutput {
            name: "thumb".to_string(),
            file_type: FileType::Image,
            disk: "media".to_string(),
            filename: "thumb".to_string(),
            extension: "png".to_string(),
            mime_type: "image/png".to_string(),
            size: 5,
            width: Some(2),
            height: Some(2),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_same_name() {
        let store = MemoryStore::new();
        let file = store.insert(&file()).await.unwrap();

        let first = store.upsert(file.id, &thumb_output()).await.unwrap().unwrap();
        let mut second_output = thumb_output();
        second_output.size = 7;
        let second = store.upsert(file.id, &second_output).await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_for_file(file.id).await.unwrap().len(), 1);
        assert_eq!(store.find(file.id, "thumb").await.unwrap().unwrap().size, 7);
    }

    #[tokio::test]
    async fn delete_cascades_and_orphan_writes_are_dropped() {
        let store = MemoryStore::new();
        let file = store.insert(&file()).await.unwrap();
        store.upsert(file.id, &thumb_output()).await.unwrap();
        store.attach(file.id, "article", Uuid::new_v4()).await.unwrap();

        assert!(store.delete(file.id).await.unwrap());
        assert_eq!(store.transformation_count(), 0);
        assert_eq!(store.attachment_count(file.id).await.unwrap(), 0);

        assert!(store.upsert(file.id, &thumb_output()).await.unwrap().is_none());
        assert!(store
            .promote(file.id, &thumb_output().canonical_update())
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.promotion_count(), 0);
    }

    #[tokio::test]
    async fn sync_replaces_attachment_set() {
        let store = MemoryStore::new();
        let a = store.insert(&file()).await.unwrap();
        let b = store.insert(&file()).await.unwrap();
        let article = Uuid::new_v4();

        store.attach(a.id, "article", article).await.unwrap();
        store.sync("article", article, &[b.id]).await.unwrap();

        assert_eq!(store.files_for("article", article).await.unwrap(), vec![b.id]);
        assert_eq!(store.attached_ids(b.id, "article").await.unwrap(), vec![article]);
        assert!(!store.detach(a.id, "article", article).await.unwrap());
    }

    #[tokio::test]
    async fn list_applies_query() {
        let store = MemoryStore::new();
        let mut hidden = file();
        hidden.is_hidden = true;
        hidden.completed = true;
        store.insert(&hidden).await.unwrap();
        let mut shown = file();
        shown.completed = true;
        let shown = store.insert(&shown).await.unwrap();
        let pending = store.insert(&file()).await.unwrap();

        let files = store.list(&FileQuery::new().hidden(false)).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, shown.id);

        let files = store
            .list(&FileQuery::new().hidden(false).include_incomplete())
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.id == pending.id));
    }

    #[tokio::test]
    async fn job_claim_respects_queue_and_counts_attempts() {
        let store = MemoryJobStore::new();
        let file_id = Uuid::new_v4();
        store
            .enqueue(&NewJob {
                queue: "video".to_string(),
                payload: JobPayload::Transform {
                    file_id,
                    name: "default".to_string(),
                },
                max_attempts: 3,
                timeout_seconds: 60,
            })
            .await
            .unwrap();

        assert!(store.claim_next(&["default".to_string()]).await.unwrap().is_none());
        assert!(store.has_active_jobs(file_id).await.unwrap());

        let job = store.claim_next(&["video".to_string()]).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert!(store.claim_next(&["video".to_string()]).await.unwrap().is_none());

        store
            .reschedule(job.id, Utc::now() + Duration::seconds(30), serde_json::json!({}))
            .await
            .unwrap();
        assert!(store.claim_next(&["video".to_string()]).await.unwrap().is_none());
        store.release_backoff();
        let again = store.claim_next(&["video".to_string()]).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);

        store.mark_completed(again.id, serde_json::json!({})).await.unwrap();
        assert!(!store.has_active_jobs(file_id).await.unwrap());
    }

    #[tokio::test]
    async fn reaper_resets_jobs_past_deadline() {
        let store = MemoryJobStore::new();
        let job = store
            .enqueue(&NewJob {
                queue: "default".to_string(),
                payload: JobPayload::DeleteFile {
                    file_id: Uuid::new_v4(),
                    disk: "media".to_string(),
                },
                max_attempts: 3,
                timeout_seconds: 0,
            })
            .await
            .unwrap();
        store.claim_next(&["default".to_string()]).await.unwrap();
        store
            .update(job.id, |job| {
                job.started_at = Some(Utc::now() - Duration::seconds(10))
            })
            .unwrap();

        assert_eq!(store.reap_stale(5).await.unwrap(), 1);
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Pending);
    }
}
