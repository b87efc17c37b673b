use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use uuid::Uuid;

use llm_eval_core::{
    CoreError, EvaluatorType, ExecutionRecord, ExecutionRecordId, Result, SubTask, SubTaskFailure,
    SubTaskFilter, SubTaskId, SubTaskStatus, Task, TaskConfig, TaskId, TaskStatus, TaskStore,
    TokenUsage,
};

/// Configuration for PostgreSQL connection pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
    pub run_migrations: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_seconds: 5,
            idle_timeout_seconds: 600,  // 10 minutes
            max_lifetime_seconds: 1800, // 30 minutes
            run_migrations: true,
        }
    }
}

impl PostgresConfig {
    pub fn new(database_url: String) -> Self {
        Self {
            database_url,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create a PostgreSQL connection pool with custom configuration
pub async fn create_pool(config: &PostgresConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_seconds)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime_seconds)))
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        "PostgreSQL connection pool created (max: {}, min: {})",
        config.max_connections,
        config.min_connections
    );

    Ok(pool)
}

/// Run database migrations
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
    pub active: usize,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool(size: {}, active: {}, idle: {})",
            self.size, self.active, self.idle
        )
    }
}

const SUBTASK_COLUMNS: &str = r#"
    id, task_id, test_case_id, model_id, dimension_id, evaluator_id, evaluator_type,
    repetition_index, status, execution_priority, depends_on, dependencies_resolved,
    raw_score, max_score, justification, model_response, token_usage, error_message,
    failure, attempt_count, created_at, updated_at, started_at, completed_at
"#;

const TASK_COLUMNS: &str = r#"
    id, name, status, config, error_message, created_at, updated_at, started_at, finished_at
"#;

/// [`TaskStore`] backed by PostgreSQL. Conditional updates are a single
/// `UPDATE ... WHERE id = $1 AND status = $2`.
#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle();
        PoolStatus {
            size,
            idle,
            active: (size as usize).saturating_sub(idle),
        }
    }

    fn row_to_task(row: PgRow) -> Result<Task> {
        let status: String = row.try_get("status")?;
        let config: serde_json::Value = row.try_get("config")?;
        Ok(Task {
            id: TaskId(row.try_get("id")?),
            name: row.try_get("name")?,
            status: TaskStatus::parse(&status)
                .ok_or_else(|| CoreError::Serialization(format!("unknown task status {}", status)))?,
            config: serde_json::from_value::<TaskConfig>(config)?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn row_to_subtask(row: PgRow) -> Result<SubTask> {
        let status: String = row.try_get("status")?;
        let evaluator_type: String = row.try_get("evaluator_type")?;
        let depends_on: Vec<Uuid> = row.try_get("depends_on")?;
        let token_usage: serde_json::Value = row.try_get("token_usage")?;
        let failure: Option<serde_json::Value> = row.try_get("failure")?;
        let repetition_index: i32 = row.try_get("repetition_index")?;
        let attempt_count: i32 = row.try_get("attempt_count")?;

        Ok(SubTask {
            id: SubTaskId(row.try_get("id")?),
            task_id: TaskId(row.try_get("task_id")?),
            test_case_id: row.try_get::<Uuid, _>("test_case_id")?.into(),
            model_id: row.try_get::<Uuid, _>("model_id")?.into(),
            dimension_id: row.try_get::<Uuid, _>("dimension_id")?.into(),
            evaluator_id: row.try_get::<Uuid, _>("evaluator_id")?.into(),
            evaluator_type: EvaluatorType::parse(&evaluator_type).ok_or_else(|| {
                CoreError::Serialization(format!("unknown evaluator type {}", evaluator_type))
            })?,
            repetition_index: repetition_index.max(0) as u32,
            status: SubTaskStatus::parse(&status).ok_or_else(|| {
                CoreError::Serialization(format!("unknown subtask status {}", status))
            })?,
            execution_priority: row.try_get("execution_priority")?,
            depends_on: depends_on.into_iter().map(SubTaskId).collect(),
            dependencies_resolved: row.try_get("dependencies_resolved")?,
            raw_score: row.try_get("raw_score")?,
            max_score: row.try_get("max_score")?,
            justification: row.try_get("justification")?,
            model_response: row.try_get("model_response")?,
            token_usage: serde_json::from_value::<TokenUsage>(token_usage)?,
            error_message: row.try_get("error_message")?,
            failure: failure
                .map(serde_json::from_value::<SubTaskFailure>)
                .transpose()?,
            attempt_count: attempt_count.max(0) as u32,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &SubTaskFilter) {
        builder.push(" WHERE TRUE");
        if let Some(task_id) = filter.task_id {
            builder.push(" AND task_id = ").push_bind(task_id.0);
        }
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> =
                filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
            builder.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        if let Some(model_id) = filter.model_id {
            builder.push(" AND model_id = ").push_bind(model_id.0);
        }
        if let Some(cutoff) = filter.updated_before {
            builder.push(" AND updated_at < ").push_bind(cutoff);
        }
    }
}

fn failure_json(subtask: &SubTask) -> Result<Option<serde_json::Value>> {
    subtask
        .failure
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(CoreError::from)
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        let config = serde_json::to_value(&task.config)?;
        sqlx::query(
            r#"
            INSERT INTO eval_tasks (
                id, name, status, config, error_message,
                created_at, updated_at, started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(task.id.0)
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(config)
        .bind(&task.error_message)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM eval_tasks WHERE id = $1", TASK_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_task).transpose()
    }

    async fn list_tasks(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM eval_tasks
            WHERE cardinality($1::text[]) = 0 OR status = ANY($1)
            ORDER BY created_at, id
            "#,
            TASK_COLUMNS
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_task).collect()
    }

    async fn update_task_if(&self, task: &Task, expected: TaskStatus) -> Result<bool> {
        let config = serde_json::to_value(&task.config)?;
        let result = sqlx::query(
            r#"
            UPDATE eval_tasks
            SET name = $3, status = $4, config = $5, error_message = $6,
                updated_at = $7, started_at = $8, finished_at = $9
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(task.id.0)
        .bind(expected.as_str())
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(config)
        .bind(&task.error_message)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_subtasks(&self, subtasks: &[SubTask]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for subtask in subtasks {
            let depends_on: Vec<Uuid> = subtask.depends_on.iter().map(|d| d.0).collect();
            let result = sqlx::query(
                r#"
                INSERT INTO eval_subtasks (
                    id, task_id, test_case_id, model_id, dimension_id, evaluator_id,
                    evaluator_type, repetition_index, status, execution_priority, depends_on,
                    dependencies_resolved, raw_score, max_score, justification, model_response,
                    token_usage, error_message, failure, attempt_count,
                    created_at, updated_at, started_at, completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                        $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(subtask.id.0)
            .bind(subtask.task_id.0)
            .bind(subtask.test_case_id.0)
            .bind(subtask.model_id.0)
            .bind(subtask.dimension_id.0)
            .bind(subtask.evaluator_id.0)
            .bind(subtask.evaluator_type.as_str())
            .bind(subtask.repetition_index as i32)
            .bind(subtask.status.as_str())
            .bind(subtask.execution_priority)
            .bind(depends_on)
            .bind(subtask.dependencies_resolved)
            .bind(subtask.raw_score)
            .bind(subtask.max_score)
            .bind(&subtask.justification)
            .bind(&subtask.model_response)
            .bind(serde_json::to_value(subtask.token_usage)?)
            .bind(&subtask.error_message)
            .bind(failure_json(subtask)?)
            .bind(subtask.attempt_count as i32)
            .bind(subtask.created_at)
            .bind(subtask.updated_at)
            .bind(subtask.started_at)
            .bind(subtask.completed_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_subtask(&self, id: &SubTaskId) -> Result<Option<SubTask>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM eval_subtasks WHERE id = $1",
            SUBTASK_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_subtask).transpose()
    }

    async fn list_subtasks(&self, filter: &SubTaskFilter) -> Result<Vec<SubTask>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM eval_subtasks", SUBTASK_COLUMNS));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_subtask).collect()
    }

    async fn count_subtasks(&self, filter: &SubTaskFilter) -> Result<usize> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM eval_subtasks");
        Self::push_filter(&mut builder, filter);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn update_subtask_if(&self, subtask: &SubTask, expected: SubTaskStatus) -> Result<bool> {
        let depends_on: Vec<Uuid> = subtask.depends_on.iter().map(|d| d.0).collect();
        let result = sqlx::query(
            r#"
            UPDATE eval_subtasks
            SET status = $3, execution_priority = $4, depends_on = $5,
                dependencies_resolved = $6, raw_score = $7, justification = $8,
                model_response = $9, token_usage = $10, error_message = $11,
                failure = $12, attempt_count = $13, updated_at = $14,
                started_at = $15, completed_at = $16
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(subtask.id.0)
        .bind(expected.as_str())
        .bind(subtask.status.as_str())
        .bind(subtask.execution_priority)
        .bind(depends_on)
        .bind(subtask.dependencies_resolved)
        .bind(subtask.raw_score)
        .bind(&subtask.justification)
        .bind(&subtask.model_response)
        .bind(serde_json::to_value(subtask.token_usage)?)
        .bind(&subtask.error_message)
        .bind(failure_json(subtask)?)
        .bind(subtask.attempt_count as i32)
        .bind(subtask.updated_at)
        .bind(subtask.started_at)
        .bind(subtask.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO eval_execution_records (
                id, subtask_id, task_id, provider, model_identifier, latency_ms,
                token_usage, finish_reason, evaluator_metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.0)
        .bind(record.subtask_id.0)
        .bind(record.task_id.0)
        .bind(&record.provider)
        .bind(&record.model_identifier)
        .bind(record.latency_ms as i64)
        .bind(serde_json::to_value(record.token_usage)?)
        .bind(&record.finish_reason)
        .bind(&record.evaluator_metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_execution_records(&self, subtask_id: &SubTaskId) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subtask_id, task_id, provider, model_identifier, latency_ms,
                   token_usage, finish_reason, evaluator_metadata, created_at
            FROM eval_execution_records
            WHERE subtask_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(subtask_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let latency_ms: i64 = row.try_get("latency_ms")?;
                let token_usage: serde_json::Value = row.try_get("token_usage")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(ExecutionRecord {
                    id: ExecutionRecordId(row.try_get("id")?),
                    subtask_id: SubTaskId(row.try_get("subtask_id")?),
                    task_id: TaskId(row.try_get("task_id")?),
                    provider: row.try_get("provider")?,
                    model_identifier: row.try_get("model_identifier")?,
                    latency_ms: latency_ms.max(0) as u64,
                    token_usage: serde_json::from_value(token_usage)?,
                    finish_reason: row.try_get("finish_reason")?,
                    evaluator_metadata: row.try_get("evaluator_metadata")?,
                    created_at,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        tracing::debug!("Database health check passed");
        Ok(())
    }
}
