//! Durable [`JobQueue`] on a Postgres table, leased with `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tokio::time::Instant;

use llm_eval_core::{Job, JobId, JobQueue, NackOutcome, Result, SubTaskId, TaskId};

use crate::memory_queue::QueueSettings;

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    settings: QueueSettings,
    poll_interval: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, settings: QueueSettings) -> Self {
        Self {
            pool,
            settings,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn row_to_job(row: PgRow) -> Result<Job> {
        let deliveries: i32 = row.try_get("deliveries")?;
        Ok(Job {
            id: JobId(row.try_get("id")?),
            task_id: TaskId(row.try_get("task_id")?),
            subtask_id: SubTaskId(row.try_get("subtask_id")?),
            deliveries: deliveries.max(0) as u32,
            enqueued_at: row.try_get("enqueued_at")?,
        })
    }

    async fn try_lease(&self) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE eval_jobs
            SET deliveries = deliveries + 1,
                visible_at = NOW() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM eval_jobs
                WHERE dead_lettered_at IS NULL AND visible_at <= NOW()
                ORDER BY enqueued_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, task_id, subtask_id, deliveries, enqueued_at
            "#,
        )
        .bind(self.settings.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_job).transpose()
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO eval_jobs (id, task_id, subtask_id, deliveries, enqueued_at, visible_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(job.id.0)
        .bind(job.task_id.0)
        .bind(job.subtask_id.0)
        .bind(job.deliveries as i32)
        .bind(job.enqueued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(job) = self.try_lease().await? {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        }
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        sqlx::query("DELETE FROM eval_jobs WHERE id = $1")
            .bind(job_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, error: &str) -> Result<NackOutcome> {
        let dead: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE eval_jobs
            SET last_error = $2,
                visible_at = NOW(),
                dead_lettered_at = CASE WHEN deliveries >= $3 THEN NOW() ELSE NULL END
            WHERE id = $1 AND dead_lettered_at IS NULL
            RETURNING dead_lettered_at IS NOT NULL
            "#,
        )
        .bind(job_id.0)
        .bind(error)
        .bind(self.settings.max_deliveries as i32)
        .fetch_optional(&self.pool)
        .await?;

        match dead {
            Some(false) => Ok(NackOutcome::Requeued),
            Some(true) | None => {
                tracing::warn!(job_id = %job_id, error, "Job dead-lettered");
                Ok(NackOutcome::DeadLettered)
            }
        }
    }

    async fn purge_task(&self, task_id: &TaskId) -> Result<usize> {
        let result =
            sqlx::query("DELETE FROM eval_jobs WHERE task_id = $1 AND dead_lettered_at IS NULL")
                .bind(task_id.0)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn pending_len(&self) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM eval_jobs WHERE dead_lettered_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as usize)
    }
}
