//! Job executor: runs an [`Invocation`] in the caller or enqueues it.

use anyhow::{Context, Result};
use std::sync::{Arc, Weak};
use std::time::Instant;
use uuid::Uuid;

use medialib_core::constants::DEFAULT_QUEUE;
use medialib_core::models::{Job, JobPayload, NewJob};
use medialib_core::Config;
use medialib_db::JobStore;

use crate::context::JobHandlerContext;
use crate::invocation::Invocation;

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// Attempts a deferred job gets, the first run included.
    pub max_attempts: i32,
    pub timeout_seconds: i32,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            timeout_seconds: 3600,
        }
    }
}

impl JobExecutorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.job_queue_max_retries.max(0) + 1,
            timeout_seconds: config.job_queue_default_timeout_seconds,
        }
    }
}

/// Where an invocation ended up.
#[derive(Debug)]
pub enum Dispatch {
    /// Ran in the caller; the handler's result.
    Inline(serde_json::Value),
    Queued(Job),
}

#[derive(Clone)]
pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    context: Weak<dyn JobHandlerContext>,
    config: JobExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        context: Weak<dyn JobHandlerContext>,
        config: JobExecutorConfig,
    ) -> Self {
        Self {
            jobs,
            context,
            config,
        }
    }

    /// Run inline invocations now, enqueue the rest. Inline errors are
    /// returned to the caller as they are; deferred ones go through the
    /// queue's retry policy.
    #[tracing::instrument(skip(self), fields(file_id = %invocation.file_id, transformation = %invocation.name))]
    pub async fn execute(&self, invocation: &Invocation) -> Result<Dispatch> {
        if invocation.is_inline() {
            let start = Instant::now();
            let result = self.run_inline(&invocation.payload()).await?;
            tracing::debug!(
                duration_ms = start.elapsed().as_millis() as u64,
                "Inline transformation finished"
            );
            return Ok(Dispatch::Inline(result));
        }

        let job = self
            .enqueue(invocation.queue_name(), invocation.payload())
            .await?;
        Ok(Dispatch::Queued(job))
    }

    /// Enqueue removal of every object under the file's prefix. Cleanup is
    /// always deferred.
    pub async fn schedule_cleanup(&self, file_id: Uuid, disk: &str) -> Result<Job> {
        self.enqueue(
            DEFAULT_QUEUE,
            JobPayload::DeleteFile {
                file_id,
                disk: disk.to_string(),
            },
        )
        .await
    }

    async fn run_inline(&self, payload: &JobPayload) -> Result<serde_json::Value> {
        let ctx = self.context.upgrade().ok_or_else(|| {
            anyhow::anyhow!("JobHandlerContext was dropped, cannot run invocation")
        })?;
        ctx.dispatch_job(payload).await
    }

    async fn enqueue(&self, queue: &str, payload: JobPayload) -> Result<Job> {
        let kind = payload.kind();
        let job = self
            .jobs
            .enqueue(&NewJob {
                queue: queue.to_string(),
                payload,
                max_attempts: self.config.max_attempts,
                timeout_seconds: self.config.timeout_seconds,
            })
            .await
            .with_context(|| format!("Failed to enqueue {} job on queue '{}'", kind, queue))?;

        tracing::info!(
            job_id = %job.id,
            queue = %job.queue,
            kind = %job.kind,
            "Job enqueued"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::empty_context_weak;
    use async_trait::async_trait;
    use medialib_core::models::JobStatus;
    use medialib_core::QueuePolicy;
    use medialib_db::MemoryJobStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        payloads: Mutex<Vec<JobPayload>>,
    }

    #[async_trait]
    impl JobHandlerContext for Recorder {
        async fn dispatch_job(self: Arc<Self>, payload: &JobPayload) -> Result<serde_json::Value> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(serde_json::json!({ "ran": true }))
        }
    }

    #[tokio::test]
    async fn inline_runs_in_caller_without_job() {
        let jobs = Arc::new(MemoryJobStore::new());
        let recorder = Arc::new(Recorder::default());
        let ctx: Arc<dyn JobHandlerContext> = recorder.clone();
        let executor = JobExecutor::new(jobs.clone(), Arc::downgrade(&ctx), JobExecutorConfig::default());

        let id = Uuid::new_v4();
        let dispatch = executor
            .execute(&Invocation::new(id, "thumb", QueuePolicy::Inline))
            .await
            .unwrap();

        assert!(matches!(dispatch, Dispatch::Inline(_)));
        assert!(jobs.all().is_empty());
        assert_eq!(
            *recorder.payloads.lock().unwrap(),
            vec![JobPayload::Transform {
                file_id: id,
                name: "thumb".into()
            }]
        );
    }

    #[tokio::test]
    async fn deferred_invocation_lands_on_its_queue() {
        let jobs = Arc::new(MemoryJobStore::new());
        let executor = JobExecutor::new(
            jobs.clone(),
            empty_context_weak(),
            JobExecutorConfig {
                max_attempts: 3,
                timeout_seconds: 600,
            },
        );

        let id = Uuid::new_v4();
        let dispatch = executor
            .execute(&Invocation::new(
                id,
                "default",
                QueuePolicy::Named("medialib_video".into()),
            ))
            .await
            .unwrap();

        let Dispatch::Queued(job) = dispatch else {
            panic!("expected a queued job");
        };
        assert_eq!(job.queue, "medialib_video");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!((job.max_attempts, job.timeout_seconds), (3, 600));
        assert_eq!(job.file_id, Some(id));
    }

    #[tokio::test]
    async fn cleanup_is_always_queued() {
        let jobs = Arc::new(MemoryJobStore::new());
        let executor = JobExecutor::new(jobs.clone(), empty_context_weak(), JobExecutorConfig::default());

        let id = Uuid::new_v4();
        executor.schedule_cleanup(id, "media").await.unwrap();

        let all = jobs.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].queue, DEFAULT_QUEUE);
        assert_eq!(
            all[0].payload().unwrap(),
            JobPayload::DeleteFile {
                file_id: id,
                disk: "media".into()
            }
        );
    }

    #[tokio::test]
    async fn inline_without_context_errors() {
        let executor = JobExecutor::new(
            Arc::new(MemoryJobStore::new()),
            empty_context_weak(),
            JobExecutorConfig::default(),
        );
        let result = executor
            .execute(&Invocation::new(Uuid::new_v4(), "thumb", QueuePolicy::Inline))
            .await;
        assert!(result.is_err());
    }
}
