use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::{
    Dimension, DimensionId, Evaluator, EvaluatorId, ExecutionRecord, Job, JobId, Model, ModelId,
    SubTask, SubTaskId, SubTaskStatus, Task, TaskId, TaskStatus, TestCase, TestCaseId,
};
use crate::error::Result;

/// Selection criteria for SubTask queries. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SubTaskFilter {
    pub task_id: Option<TaskId>,
    pub statuses: Vec<SubTaskStatus>,
    pub model_id: Option<ModelId>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl SubTaskFilter {
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn with_status(status: SubTaskStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Default::default()
        }
    }

    pub fn statuses(mut self, statuses: &[SubTaskStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn model(mut self, model_id: ModelId) -> Self {
        self.model_id = Some(model_id);
        self
    }

    pub fn updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn matches(&self, subtask: &SubTask) -> bool {
        self.task_id.map_or(true, |id| subtask.task_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&subtask.status))
            && self.model_id.map_or(true, |id| subtask.model_id == id)
            && self.updated_before.map_or(true, |cutoff| subtask.updated_at < cutoff)
    }
}

/// The persistent store: the single source of truth shared by every worker.
///
/// Every status transition goes through one of the `*_if` methods, which
/// write only when the stored status still equals `expected`. They return
/// `Ok(false)` when another writer got there first; callers abandon the
/// record for the current cycle.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> Result<()>;
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>>;
    async fn list_tasks(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>>;
    async fn update_task_if(&self, task: &Task, expected: TaskStatus) -> Result<bool>;

    /// Inserts SubTasks whose natural key is not yet present. Returns how
    /// many rows were created.
    async fn insert_subtasks(&self, subtasks: &[SubTask]) -> Result<usize>;
    async fn get_subtask(&self, id: &SubTaskId) -> Result<Option<SubTask>>;
    async fn list_subtasks(&self, filter: &SubTaskFilter) -> Result<Vec<SubTask>>;
    async fn count_subtasks(&self, filter: &SubTaskFilter) -> Result<usize>;
    async fn update_subtask_if(&self, subtask: &SubTask, expected: SubTaskStatus) -> Result<bool>;

    async fn insert_execution_record(&self, record: &ExecutionRecord) -> Result<()>;
    async fn list_execution_records(&self, subtask_id: &SubTaskId) -> Result<Vec<ExecutionRecord>>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()>;
}

/// Read-only access to models, test cases, dimensions and evaluators.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_model(&self, id: &ModelId) -> Result<Option<Model>>;
    async fn find_model(&self, logical_name: &str) -> Result<Option<Model>>;
    async fn list_models(&self) -> Result<Vec<Model>>;
    async fn get_test_case(&self, id: &TestCaseId) -> Result<Option<TestCase>>;
    async fn get_dimension(&self, id: &DimensionId) -> Result<Option<Dimension>>;
    async fn get_evaluator(&self, id: &EvaluatorId) -> Result<Option<Evaluator>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
}

/// Broker contract of the durable-queue backend.
///
/// `consume` leases a job; a leased job that is neither acked nor nacked
/// before its lease expires becomes visible again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<()>;
    async fn consume(&self, wait: Duration) -> Result<Option<Job>>;
    async fn ack(&self, job_id: &JobId) -> Result<()>;
    async fn nack(&self, job_id: &JobId, error: &str) -> Result<NackOutcome>;
    /// Drops every not-yet-acked job of a task. Returns the number removed.
    async fn purge_task(&self, task_id: &TaskId) -> Result<usize>;
    async fn pending_len(&self) -> Result<usize>;
}
