use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::ids::{DimensionId, ModelId, TaskId, TestCaseId};

// ===== Task Status =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Preparing,
    Queued,
    Running,
    Paused,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::CompletedWithErrors
                | TaskStatus::Failed
                | TaskStatus::Cancelled
        )
    }

    /// Whether the controller may select work belonging to a task in this state.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::CompletedWithErrors => "completed_with_errors",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => TaskStatus::Pending,
            "preparing" => TaskStatus::Preparing,
            "queued" => TaskStatus::Queued,
            "running" => TaskStatus::Running,
            "paused" => TaskStatus::Paused,
            "completed" => TaskStatus::Completed,
            "completed_with_errors" => TaskStatus::CompletedWithErrors,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => return None,
        })
    }
}

// ===== Task Configuration =====

fn validate_unique<T: PartialEq>(items: &[T]) -> Result<(), ValidationError> {
    for (i, item) in items.iter().enumerate() {
        if items[..i].contains(item) {
            return Err(ValidationError::new("duplicate_entry"));
        }
    }
    Ok(())
}

fn validate_unique_models(items: &Vec<ModelId>) -> Result<(), ValidationError> {
    validate_unique(items)
}

fn validate_unique_test_cases(items: &Vec<TestCaseId>) -> Result<(), ValidationError> {
    validate_unique(items)
}

fn validate_unique_dimensions(items: &Vec<DimensionId>) -> Result<(), ValidationError> {
    validate_unique(items)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct TaskConfig {
    #[validate(length(min = 1), custom(function = "validate_unique_models"))]
    pub models: Vec<ModelId>,

    #[validate(length(min = 1), custom(function = "validate_unique_test_cases"))]
    pub test_cases: Vec<TestCaseId>,

    #[validate(length(min = 1), custom(function = "validate_unique_dimensions"))]
    pub dimensions: Vec<DimensionId>,

    /// Maximum number of this task's SubTasks running at once.
    #[validate(range(min = 1, max = 1024))]
    pub concurrency_limit: u32,

    /// Per-inference-call timeout in seconds.
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,

    /// How many times a failed SubTask may be resubmitted.
    #[validate(range(max = 10))]
    pub retry_count: u32,

    /// Number of repetitions of every (model, test case, dimension) triple.
    #[validate(range(min = 1, max = 100))]
    pub run_count: u32,

    #[serde(default)]
    pub human_evaluation_mode: bool,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            test_cases: Vec::new(),
            dimensions: Vec::new(),
            concurrency_limit: 4,
            timeout_secs: 120,
            retry_count: 1,
            run_count: 1,
            human_evaluation_mode: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl TaskConfig {
    /// Number of SubTasks the task expands into.
    pub fn expected_subtasks(&self) -> usize {
        self.models.len() * self.test_cases.len() * self.dimensions.len() * self.run_count as usize
    }
}

// ===== Task Domain Model =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Task {
    pub id: TaskId,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub status: TaskStatus,

    #[validate(nested)]
    pub config: TaskConfig,

    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: impl Into<String>, config: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            name: name.into(),
            status: TaskStatus::Pending,
            config,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the task into a terminal state and stamps `finished_at`.
    pub fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
        self.finish(TaskStatus::Failed);
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Marks the task running the first time any of its work is dispatched.
    pub fn mark_started(&mut self) {
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TaskConfig {
        TaskConfig {
            models: vec![ModelId::new()],
            test_cases: vec![TestCaseId::new(), TestCaseId::new()],
            dimensions: vec![DimensionId::new()],
            run_count: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_expected_subtasks() {
        assert_eq!(config().expected_subtasks(), 6);
    }

    #[test]
    fn test_config_rejects_empty_models() {
        let mut cfg = config();
        cfg.models.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_rejects_duplicate_test_cases() {
        let mut cfg = config();
        let dup = cfg.test_cases[0];
        cfg.test_cases.push(dup);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Preparing,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::CompletedWithErrors,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
    }
}
