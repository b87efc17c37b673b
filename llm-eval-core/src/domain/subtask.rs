use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluator::EvaluatorType;
use super::ids::{DimensionId, EvaluatorId, ModelId, SubTaskId, TaskId, TestCaseId};

// ===== SubTask Status =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    PendingHumanReview,
}

impl SubTaskStatus {
    /// `PendingHumanReview` is deliberately not terminal: a task waiting on
    /// a reviewer never completes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubTaskStatus::Completed | SubTaskStatus::Failed | SubTaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubTaskStatus::Pending => "pending",
            SubTaskStatus::Running => "running",
            SubTaskStatus::Completed => "completed",
            SubTaskStatus::Failed => "failed",
            SubTaskStatus::Cancelled => "cancelled",
            SubTaskStatus::PendingHumanReview => "pending_human_review",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => SubTaskStatus::Pending,
            "running" => SubTaskStatus::Running,
            "completed" => SubTaskStatus::Completed,
            "failed" => SubTaskStatus::Failed,
            "cancelled" => SubTaskStatus::Cancelled,
            "pending_human_review" => SubTaskStatus::PendingHumanReview,
            _ => return None,
        })
    }
}

/// Where a SubTask failure originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    /// Every provider in the failover chain was exhausted.
    Inference,
    /// The evaluator itself failed (judge unavailable, sandbox crashed).
    Evaluator,
    /// A completed result carried neither a score nor a response.
    Consistency,
    /// A dependency SubTask did not complete successfully.
    Dependency,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTaskFailure {
    pub source: FailureSource,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub reasoning_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens + self.reasoning_tokens
    }
}

/// Natural key of a SubTask; at most one SubTask exists per key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubTaskKey {
    pub task_id: TaskId,
    pub model_id: ModelId,
    pub dimension_id: DimensionId,
    pub test_case_id: TestCaseId,
    pub repetition_index: u32,
}

// ===== SubTask Domain Model =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubTask {
    pub id: SubTaskId,
    pub task_id: TaskId,
    pub test_case_id: TestCaseId,
    pub model_id: ModelId,
    pub dimension_id: DimensionId,
    pub evaluator_id: EvaluatorId,
    pub evaluator_type: EvaluatorType,
    pub repetition_index: u32,
    pub status: SubTaskStatus,
    /// Lower runs sooner.
    pub execution_priority: i32,
    pub depends_on: Vec<SubTaskId>,
    pub dependencies_resolved: bool,
    pub raw_score: Option<f64>,
    /// Copied from the test case when the SubTask is created.
    pub max_score: f64,
    pub justification: Option<String>,
    pub model_response: Option<String>,
    pub token_usage: TokenUsage,
    pub error_message: Option<String>,
    pub failure: Option<SubTaskFailure>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubTask {
    pub fn new(key: SubTaskKey, evaluator_id: EvaluatorId, evaluator_type: EvaluatorType, max_score: f64) -> Self {
        let now = Utc::now();
        Self {
            id: SubTaskId::new(),
            task_id: key.task_id,
            test_case_id: key.test_case_id,
            model_id: key.model_id,
            dimension_id: key.dimension_id,
            evaluator_id,
            evaluator_type,
            repetition_index: key.repetition_index,
            status: SubTaskStatus::Pending,
            execution_priority: 0,
            depends_on: Vec::new(),
            dependencies_resolved: true,
            raw_score: None,
            max_score,
            justification: None,
            model_response: None,
            token_usage: TokenUsage::default(),
            error_message: None,
            failure: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.execution_priority = priority;
        self
    }

    pub fn with_dependencies(mut self, depends_on: Vec<SubTaskId>) -> Self {
        self.dependencies_resolved = depends_on.is_empty();
        self.depends_on = depends_on;
        self
    }

    pub fn key(&self) -> SubTaskKey {
        SubTaskKey {
            task_id: self.task_id,
            model_id: self.model_id,
            dimension_id: self.dimension_id,
            test_case_id: self.test_case_id,
            repetition_index: self.repetition_index,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Score as a percentage of `max_score`, if scored.
    pub fn percentage(&self) -> Option<f64> {
        self.raw_score.map(|raw| {
            if self.max_score > 0.0 {
                (raw / self.max_score) * 100.0
            } else {
                0.0
            }
        })
    }

    /// Claims the SubTask for execution.
    pub fn start(&mut self) {
        self.status = SubTaskStatus::Running;
        self.attempt_count += 1;
        self.raw_score = None;
        self.error_message = None;
        self.failure = None;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Records a score. The value is clamped into `[0, max_score]`; a
    /// non-finite value is not recorded at all.
    pub fn complete(&mut self, raw_score: f64, justification: impl Into<String>) {
        self.raw_score = Some(raw_score)
            .filter(|raw| raw.is_finite())
            .map(|raw| raw.clamp(0.0, self.max_score));
        self.justification = Some(justification.into());
        self.status = SubTaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>, source: FailureSource, retryable: bool) {
        self.status = SubTaskStatus::Failed;
        self.error_message = Some(message.into());
        self.failure = Some(SubTaskFailure { source, retryable });
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// No provider answered: the run scores a flat zero and stays
    /// retryable.
    pub fn fail_unanswered(&mut self, message: impl Into<String>) {
        self.raw_score = Some(0.0);
        self.fail(message, FailureSource::Inference, true);
    }

    pub fn await_human_review(&mut self) {
        self.status = SubTaskStatus::PendingHumanReview;
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self) {
        self.status = SubTaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Puts a stuck SubTask back into the pending pool.
    pub fn reset_to_pending(&mut self, reason: impl Into<String>) {
        self.status = SubTaskStatus::Pending;
        self.error_message = Some(reason.into());
        self.started_at = None;
        self.updated_at = Utc::now();
    }

    /// Downgrades a "completed" result that carries neither a score nor a
    /// response. Returns true when the SubTask was changed.
    pub fn enforce_consistency(&mut self) -> bool {
        let empty_response = self
            .model_response
            .as_deref()
            .map(|r| r.trim().is_empty())
            .unwrap_or(true);

        if self.status == SubTaskStatus::Completed && self.raw_score.is_none() && empty_response {
            self.fail(
                "completed without a score or a model response",
                FailureSource::Consistency,
                true,
            );
            return true;
        }
        false
    }

    pub fn is_retryable(&self, retry_count: u32) -> bool {
        self.status == SubTaskStatus::Failed
            && self.failure.as_ref().map(|f| f.retryable).unwrap_or(false)
            && self.attempt_count <= retry_count
    }
}
