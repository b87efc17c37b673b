use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ExecutionRecordId, SubTaskId, TaskId};
use super::subtask::TokenUsage;

/// Detail of one successful SubTask execution. Written once per completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub id: ExecutionRecordId,
    pub subtask_id: SubTaskId,
    pub task_id: TaskId,
    pub provider: String,
    pub model_identifier: String,
    pub latency_ms: u64,
    pub token_usage: TokenUsage,
    pub finish_reason: Option<String>,
    pub evaluator_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Payload of a durable queue job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: super::ids::JobId,
    pub task_id: TaskId,
    pub subtask_id: SubTaskId,
    /// How many times the job has been handed to a consumer.
    pub deliveries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(task_id: TaskId, subtask_id: SubTaskId) -> Self {
        Self {
            id: super::ids::JobId::new(),
            task_id,
            subtask_id,
            deliveries: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Aggregate counts of a task's SubTasks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending_human_review: usize,
    pub progress_percentage: f64,
}

impl TaskProgress {
    pub fn terminal(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.terminal() == self.total
    }
}
