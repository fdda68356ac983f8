use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::models::poll_job::{PollJob, ScheduledPoll};

/// Store of recurring background jobs keyed by their identity.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn is_scheduled(&self, job: &PollJob) -> Result<bool>;
    /// Registers the job unless one with the same identity exists.
    /// Returns `false` when nothing was registered.
    async fn schedule(
        &self,
        job: &PollJob,
        interval: Duration,
        first_run_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn cancel(&self, job: &PollJob) -> Result<bool>;
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledPoll>>;
    async fn reschedule(&self, job: &PollJob, next_run_at: DateTime<Utc>) -> Result<()>;
}

#[derive(sqlx::FromRow)]
struct JobRow {
    hook: String,
    exam_id: i64,
    learner_id: i64,
    attempt_id: String,
    interval_seconds: i64,
    next_run_at: DateTime<Utc>,
}

impl JobRow {
    fn into_scheduled(self) -> ScheduledPoll {
        ScheduledPoll {
            job: PollJob {
                hook: self.hook,
                exam_id: self.exam_id,
                learner_id: self.learner_id,
                attempt_id: self.attempt_id,
            },
            interval_seconds: self.interval_seconds,
            next_run_at: self.next_run_at,
        }
    }
}

#[derive(Clone)]
pub struct PgJobScheduler {
    pool: PgPool,
}

impl PgJobScheduler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobScheduler for PgJobScheduler {
    async fn is_scheduled(&self, job: &PollJob) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM scheduled_jobs
                WHERE hook = $1 AND exam_id = $2 AND learner_id = $3 AND attempt_id = $4
            )
            "#,
        )
        .bind(&job.hook)
        .bind(job.exam_id)
        .bind(job.learner_id)
        .bind(&job.attempt_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn schedule(
        &self,
        job: &PollJob,
        interval: Duration,
        first_run_at: DateTime<Utc>,
    ) -> Result<bool> {
        if self.is_scheduled(job).await? {
            return Ok(false);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (hook, exam_id, learner_id, attempt_id, interval_seconds, next_run_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (hook, exam_id, learner_id, attempt_id) DO NOTHING
            "#,
        )
        .bind(&job.hook)
        .bind(job.exam_id)
        .bind(job.learner_id)
        .bind(&job.attempt_id)
        .bind(interval.num_seconds())
        .bind(first_run_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, job: &PollJob) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM scheduled_jobs
            WHERE hook = $1 AND exam_id = $2 AND learner_id = $3 AND attempt_id = $4
            "#,
        )
        .bind(&job.hook)
        .bind(job.exam_id)
        .bind(job.learner_id)
        .bind(&job.attempt_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledPoll>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT hook, exam_id, learner_id, attempt_id, interval_seconds, next_run_at
            FROM scheduled_jobs
            WHERE next_run_at <= $1
            ORDER BY next_run_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(JobRow::into_scheduled).collect())
    }

    async fn reschedule(&self, job: &PollJob, next_run_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs SET next_run_at = $5
            WHERE hook = $1 AND exam_id = $2 AND learner_id = $3 AND attempt_id = $4
            "#,
        )
        .bind(&job.hook)
        .bind(job.exam_id)
        .bind(job.learner_id)
        .bind(&job.attempt_id)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
