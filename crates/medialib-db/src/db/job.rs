use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use medialib_core::constants::JOB_NOTIFY_CHANNEL;
use medialib_core::models::{Job, NewJob};

const JOB_COLUMNS: &str = r#"
    id, queue, kind, payload, file_id, status, attempts, max_attempts,
    timeout_seconds, run_at, started_at, completed_at, result, created_at, updated_at
"#;

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist a pending job and wake listening workers.
    #[tracing::instrument(skip(self, job), fields(queue = %job.queue, kind = job.payload.kind()))]
    pub async fn enqueue(&self, job: &NewJob) -> Result<Job> {
        let payload =
            serde_json::to_value(&job.payload).context("Failed to serialize job payload")?;

        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<Postgres, Job>(&format!(
            r#"
            INSERT INTO jobs (id, queue, kind, payload, file_id, max_attempts, timeout_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&job.queue)
        .bind(job.payload.kind())
        .bind(payload)
        .bind(job.payload.file_id())
        .bind(job.max_attempts)
        .bind(job.timeout_seconds)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to enqueue job")?;

        // Wake workers; they fall back to polling if this fails.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(JOB_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(error = %e, job_id = %created.id, "pg_notify failed, workers will pick up job on next poll");
        }

        tx.commit().await?;

        Ok(created)
    }

    /// Claim the oldest runnable job on one of `queues`.
    ///
    /// The claim counts as an attempt.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(&self, queues: &[String]) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM jobs
            WHERE status = 'pending'
              AND queue = ANY($1)
              AND run_at <= NOW()
            ORDER BY run_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queues)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to select next job")?;

        let Some(job_id) = job_id else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let job = sqlx::query_as::<Postgres, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempts = attempts + 1,
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to mark job as running")?;

        tx.commit().await?;

        Ok(Some(job))
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<Postgres, Job>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")?;

        Ok(job)
    }

    #[tracing::instrument(skip(self, result))]
    pub async fn mark_completed(&self, id: Uuid, result: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await
        .context("Failed to mark job as completed")?;

        Ok(())
    }

    #[tracing::instrument(skip(self, error))]
    pub async fn mark_failed(&self, id: Uuid, error: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark job as failed")?;

        Ok(())
    }

    /// Put a failed attempt back in line, runnable from `run_at`.
    #[tracing::instrument(skip(self, error))]
    pub async fn reschedule(
        &self,
        id: Uuid,
        run_at: DateTime<Utc>,
        error: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                run_at = $2,
                result = $3,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule job")?;

        Ok(())
    }

    /// Whether a pending or running job still refers to the file.
    #[tracing::instrument(skip(self))]
    pub async fn has_active_jobs(&self, file_id: Uuid) -> Result<bool> {
        let active = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM jobs
                WHERE file_id = $1 AND status IN ('pending', 'running')
            )
            "#,
        )
        .bind(file_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check active jobs")?;

        Ok(active)
    }

    /// Jobs that ended up failed for good, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_failed(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<Postgres, Job>(&format!(
            r#"
            SELECT {}
            FROM jobs
            WHERE status = 'failed'
            ORDER BY completed_at DESC
            LIMIT $1
            "#,
            JOB_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list failed jobs")?;

        Ok(jobs)
    }

    /// Reset jobs stuck in `running` (a worker died mid-job) back to pending.
    ///
    /// A job is stale once `started_at + timeout_seconds + grace_secs` is past.
    #[tracing::instrument(skip(self))]
    pub async fn reap_stale(&self, grace_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                started_at = NULL,
                run_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND started_at < NOW() - make_interval(secs => (timeout_seconds + $1)::double precision)
            "#,
        )
        .bind(grace_secs)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale jobs")?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::warn!(reaped, grace_secs, "Reset stale running jobs to pending");
        }

        Ok(reaped)
    }
}
