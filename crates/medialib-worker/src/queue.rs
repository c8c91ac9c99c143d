//! Job queue: worker pool, LISTEN/NOTIFY or polling, retry and stale-job reaping.
//!
//! Shutdown: [`JobQueue::shutdown`] signals the pool to stop; it does not wait for
//! in-flight jobs. A job interrupted by process exit stays `running` until the
//! reaper returns it to `pending`.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use medialib_core::constants::{DEFAULT_QUEUE, JOB_NOTIFY_CHANNEL};
use medialib_core::job_error::JobErrorKind;
use medialib_core::models::Job;
use medialib_core::{Config, JobError};
use medialib_db::JobStore;

use crate::context::JobHandlerContext;

/// Maximum delay in seconds before retrying a failed job. Caps exponential backoff
/// so that high attempt counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .checked_pow(retry_count.max(0) as u32)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

#[derive(Clone)]
pub struct JobQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Queues this worker claims from.
    pub queues: Vec<String>,
    /// Interval in seconds between runs of the stale job reaper. 0 disables it.
    pub stale_job_reap_interval_secs: u64,
    /// Grace period in seconds added to a job's timeout before it counts as stale.
    pub stale_job_grace_period_secs: i64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            queues: vec![DEFAULT_QUEUE.to_string()],
            stale_job_reap_interval_secs: 60,
            stale_job_grace_period_secs: 300,
        }
    }
}

impl JobQueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workers: config.job_queue_max_workers,
            poll_interval_ms: config.job_queue_poll_interval_ms,
            queues: config.job_queue_names.clone(),
            stale_job_reap_interval_secs: config.job_queue_stale_reap_interval_secs,
            stale_job_grace_period_secs: config.job_queue_stale_grace_period_secs,
        }
    }

    /// Same settings, restricted to `queues` when non-empty.
    pub fn with_queues(mut self, queues: Vec<String>) -> Self {
        if !queues.is_empty() {
            self.queues = queues;
        }
        self
    }
}

/// What processing a claimed job led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Returned to `pending` with a backoff.
    Retrying,
    /// Terminal failure, recorded on the job.
    Failed,
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: JobQueueConfig,
    context: Weak<dyn JobHandlerContext>,
    shutdown_tx: mpsc::Sender<()>,
}

impl JobQueue {
    /// Create a JobQueue and spawn its worker pool.
    ///
    /// If `pool` is `Some`, the worker uses PostgreSQL LISTEN/NOTIFY to wake immediately
    /// when jobs are enqueued, in addition to polling at `poll_interval_ms`.
    /// If `pool` is `None`, only polling is used.
    pub fn new(
        store: Arc<dyn JobStore>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let store_clone = store.clone();
        let config_clone = config.clone();
        let context_clone = context.clone();

        tokio::spawn(async move {
            Self::worker_pool(store_clone, config_clone, context_clone, shutdown_rx, pool).await;
        });

        Self {
            store,
            config,
            context,
            shutdown_tx,
        }
    }

    /// Creates a JobQueue that does not spawn a worker. Jobs are only
    /// processed by explicit [`JobQueue::process_next`] calls.
    pub fn new_no_worker(
        store: Arc<dyn JobStore>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            store,
            config,
            context,
            shutdown_tx,
        }
    }

    pub fn queues(&self) -> &[String] {
        &self.config.queues
    }

    /// Claim one runnable job and process it in the caller.
    /// `None` when nothing was runnable.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self
            .store
            .claim_next(&self.config.queues)
            .await
            .context("Failed to claim job")?
        else {
            return Ok(None);
        };

        let outcome = Self::process_job(job, self.store.clone(), self.context.clone()).await?;
        Ok(Some(outcome))
    }

    /// Process jobs until none is runnable. Jobs waiting out a retry backoff
    /// are left for a later run.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await?.is_some() {
            processed += 1;
        }
        tracing::info!(processed, queues = ?self.config.queues, "Job queue drained");
        Ok(processed)
    }

    async fn worker_pool(
        store: Arc<dyn JobStore>,
        config: JobQueueConfig,
        context: Weak<dyn JobHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            queues = ?config.queues,
            listen_notify = use_listen,
            "Job queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Wakes the main loop when LISTEN receives a NOTIFY.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_job_reap_interval_secs > 0 {
            let store_for_reaper = store.clone();
            let reap_interval = Duration::from_secs(config.stale_job_reap_interval_secs);
            let grace_period = config.stale_job_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = store_for_reaper.reap_stale(grace_period).await {
                                tracing::error!(error = %e, "Stale job reaper failed");
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Job queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&store, &config.queues, &semaphore, &context).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&store, &config.queues, &semaphore, &context).await;
                }
            }
        }

        tracing::info!("Job queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        store: &Arc<dyn JobStore>,
        queues: &[String],
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn JobHandlerContext>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match store.claim_next(queues).await {
            Ok(Some(job)) => {
                let store = store.clone();
                let ctx = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_job(job, store, ctx).await {
                        tracing::error!(error = %e, "Job processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim job from queue");
            }
        }
    }

    #[tracing::instrument(skip(store, context), fields(job_id = %job.id, queue = %job.queue, kind = %job.kind))]
    async fn process_job(
        job: Job,
        store: Arc<dyn JobStore>,
        context: Weak<dyn JobHandlerContext>,
    ) -> Result<JobOutcome> {
        let payload = match job.payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Job payload cannot be decoded, failing job");
                store
                    .mark_failed(
                        job.id,
                        json!({
                            "error": e.to_string(),
                            "attempts": job.attempts,
                            "unrecoverable": true,
                            "reason": "Invalid job payload"
                        }),
                    )
                    .await
                    .context("Failed to mark job as failed")?;
                return Ok(JobOutcome::Failed);
            }
        };

        let ctx = context.upgrade().ok_or_else(|| {
            anyhow::anyhow!("JobHandlerContext was dropped, cannot process job")
        })?;

        let timeout_duration = Duration::from_secs(job.timeout_seconds.max(1) as u64);
        let result = tokio::time::timeout(timeout_duration, ctx.dispatch_job(&payload)).await;

        let error = match result {
            Ok(Ok(job_result)) => {
                store
                    .mark_completed(job.id, job_result)
                    .await
                    .context("Failed to mark job as completed")?;
                tracing::info!(attempts = job.attempts, "Job completed successfully");
                return Ok(JobOutcome::Completed);
            }
            Ok(Err(e)) => e,
            Err(_) => JobError::timeout(anyhow::anyhow!(
                "Job execution timed out after {} seconds",
                job.timeout_seconds
            ))
            .into(),
        };

        let kind = JobError::kind_of(&error);
        tracing::warn!(
            error = %error,
            kind = %kind,
            attempts = job.attempts,
            max_attempts = job.max_attempts,
            "Job execution failed"
        );

        if kind == JobErrorKind::Unrecoverable {
            store
                .mark_failed(
                    job.id,
                    json!({
                        "error": error.to_string(),
                        "attempts": job.attempts,
                        "unrecoverable": true,
                        "reason": "Job failed with unrecoverable error (e.g., missing configuration, unknown transformer)"
                    }),
                )
                .await
                .context("Failed to mark job as failed")?;
            tracing::error!(error = %error, "Job failed with unrecoverable error, will not retry");
            return Ok(JobOutcome::Failed);
        }

        if job.can_retry() {
            let backoff_seconds = compute_retry_backoff_seconds(job.attempts - 1);
            let run_at = Utc::now() + chrono::Duration::seconds(backoff_seconds as i64);
            tracing::info!(
                attempts = job.attempts,
                backoff_seconds,
                "Scheduling job retry"
            );
            store
                .reschedule(
                    job.id,
                    run_at,
                    json!({
                        "error": error.to_string(),
                        "kind": kind.to_string(),
                        "attempts": job.attempts
                    }),
                )
                .await
                .context("Failed to reschedule job")?;
            return Ok(JobOutcome::Retrying);
        }

        store
            .mark_failed(
                job.id,
                json!({
                    "error": error.to_string(),
                    "kind": kind.to_string(),
                    "attempts": job.attempts,
                    "reason": "Job failed after maximum attempts"
                }),
            )
            .await
            .context("Failed to mark job as failed")?;
        tracing::error!(error = %error, attempts = job.attempts, "Job failed after max attempts");
        Ok(JobOutcome::Failed)
    }

    /// Signals the worker pool to stop claiming new jobs and exit the main loop.
    ///
    /// Returns immediately after sending the signal. Already-spawned job
    /// handlers keep running until they complete or time out.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating job queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Clone for JobQueue {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            context: self.context.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use medialib_core::models::{JobPayload, JobStatus, NewJob};
    use medialib_db::MemoryJobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Fails the first `failures` dispatches with errors built by `make_error`.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        make_error: fn() -> anyhow::Error,
    }

    impl Flaky {
        fn new(failures: usize, make_error: fn() -> anyhow::Error) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
                make_error,
            })
        }
    }

    #[async_trait]
    impl JobHandlerContext for Flaky {
        async fn dispatch_job(self: Arc<Self>, _payload: &JobPayload) -> Result<serde_json::Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.make_error)());
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn transient() -> anyhow::Error {
        JobError::transient(anyhow::anyhow!("conversion service returned 503")).into()
    }

    fn unrecoverable() -> anyhow::Error {
        JobError::unrecoverable(anyhow::anyhow!("unknown transformer 'blur'")).into()
    }

    async fn enqueue(store: &MemoryJobStore, queue: &str, max_attempts: i32) -> Job {
        store
            .enqueue(&NewJob {
                queue: queue.to_string(),
                payload: JobPayload::Transform {
                    file_id: Uuid::new_v4(),
                    name: "thumb".to_string(),
                },
                max_attempts,
                timeout_seconds: 30,
            })
            .await
            .unwrap()
    }

    fn queue(store: Arc<MemoryJobStore>, ctx: &Arc<dyn JobHandlerContext>) -> JobQueue {
        JobQueue::new_no_worker(store, JobQueueConfig::default(), Arc::downgrade(ctx))
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(80), MAX_RETRY_BACKOFF_SECS);
    }

    #[test]
    fn queue_override_keeps_other_settings() {
        let config = JobQueueConfig::default().with_queues(vec!["medialib_video".into()]);
        assert_eq!(config.queues, vec!["medialib_video".to_string()]);
        assert_eq!(config.max_workers, 4);
        assert_eq!(
            JobQueueConfig::default().with_queues(Vec::new()).queues,
            vec![DEFAULT_QUEUE.to_string()]
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_completes() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(1, transient);
        let queue = queue(store.clone(), &ctx);
        let job = enqueue(&store, DEFAULT_QUEUE, 3).await;

        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Retrying));
        let retried = store.get(job.id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.run_at > Utc::now());
        assert_eq!(retried.result.unwrap()["kind"], "transient");

        // Backoff keeps it out of reach until released.
        assert_eq!(queue.process_next().await.unwrap(), None);
        store.release_backoff();

        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Completed));
        let done = store.get(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.attempts, 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_terminally() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(usize::MAX, transient);
        let queue = queue(store.clone(), &ctx);
        let job = enqueue(&store, DEFAULT_QUEUE, 2).await;

        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Retrying));
        store.release_backoff();
        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Failed));

        let failed = store.get(job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 2);
        let result = failed.result.unwrap();
        assert_eq!(result["reason"], "Job failed after maximum attempts");
        assert!(result["error"].as_str().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn unrecoverable_failure_is_not_retried() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(usize::MAX, unrecoverable);
        let queue = queue(store.clone(), &ctx);
        let job = enqueue(&store, DEFAULT_QUEUE, 5).await;

        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Failed));
        let failed = store.get(job.id).unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.result.unwrap()["unrecoverable"], true);
    }

    #[tokio::test]
    async fn plain_errors_are_retried() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(1, || anyhow::anyhow!("connection reset"));
        let queue = queue(store.clone(), &ctx);
        enqueue(&store, DEFAULT_QUEUE, 3).await;

        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Retrying));
    }

    #[tokio::test]
    async fn undecodable_payload_fails() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(0, transient);
        let queue = queue(store.clone(), &ctx);

        let mut job = enqueue(&store, DEFAULT_QUEUE, 3).await;
        let claimed = store.claim_next(&[DEFAULT_QUEUE.to_string()]).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        job = claimed;
        job.payload = json!({ "kind": "resample" });

        let outcome = JobQueue::process_job(job.clone(), store.clone(), Arc::downgrade(&ctx))
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Failed);
        assert!(queue.process_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_configured_queues_are_claimed() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(0, transient);
        let video_worker = JobQueue::new_no_worker(
            store.clone(),
            JobQueueConfig::default().with_queues(vec!["medialib_video".into()]),
            Arc::downgrade(&ctx),
        );
        let default_job = enqueue(&store, DEFAULT_QUEUE, 3).await;
        let video_job = enqueue(&store, "medialib_video", 3).await;

        assert_eq!(video_worker.drain().await.unwrap(), 1);
        assert_eq!(store.get(video_job.id).unwrap().status, JobStatus::Completed);
        assert_eq!(store.get(default_job.id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn slow_job_times_out_and_is_retried() {
        struct Slow;

        #[async_trait]
        impl JobHandlerContext for Slow {
            async fn dispatch_job(self: Arc<Self>, _payload: &JobPayload) -> Result<serde_json::Value> {
                sleep(Duration::from_secs(5)).await;
                Ok(json!({}))
            }
        }

        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Arc::new(Slow);
        let queue = queue(store.clone(), &ctx);
        let job = store
            .enqueue(&NewJob {
                queue: DEFAULT_QUEUE.to_string(),
                payload: JobPayload::DeleteFile {
                    file_id: Uuid::new_v4(),
                    disk: "media".into(),
                },
                max_attempts: 2,
                timeout_seconds: 1,
            })
            .await
            .unwrap();

        assert_eq!(queue.process_next().await.unwrap(), Some(JobOutcome::Retrying));
        assert_eq!(store.get(job.id).unwrap().result.unwrap()["kind"], "timeout");
    }

    #[tokio::test]
    async fn worker_pool_processes_enqueued_jobs() {
        let store = Arc::new(MemoryJobStore::new());
        let ctx: Arc<dyn JobHandlerContext> = Flaky::new(0, transient);
        let job = enqueue(&store, DEFAULT_QUEUE, 3).await;

        let queue = JobQueue::new(
            store.clone(),
            JobQueueConfig {
                poll_interval_ms: 10,
                stale_job_reap_interval_secs: 0,
                ..JobQueueConfig::default()
            },
            Arc::downgrade(&ctx),
            None,
        );

        for _ in 0..200 {
            if store.get(job.id).unwrap().status == JobStatus::Completed {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        queue.shutdown().await;
        assert_eq!(store.get(job.id).unwrap().status, JobStatus::Completed);
    }
}
