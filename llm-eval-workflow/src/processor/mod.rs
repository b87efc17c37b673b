//! Processor Orchestrator.
//!
//! [`Processor`] is the contract both scheduling backends implement. The
//! work itself lives in [`ProcessorCore`]; [`PollingProcessor`] executes
//! claimed SubTasks in-process, [`QueueProcessor`] hands them to a durable
//! queue and consumes them with a worker pool.

mod engine;
mod polling;
mod queue;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use llm_eval_core::{Result, SubTaskId, Task, TaskId, TaskProgress};

pub use engine::ProcessorCore;
pub use polling::PollingProcessor;
pub use queue::QueueProcessor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTaskOutcome {
    pub success: bool,
    pub subtasks_created: usize,
    pub error: Option<String>,
}

impl ProcessTaskOutcome {
    pub fn created(subtasks_created: usize) -> Self {
        Self {
            success: true,
            subtasks_created,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            subtasks_created: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSubTaskOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ProcessSubTaskOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Per-process counters. Each worker process reports its own numbers; the
/// store remains the source of truth for progress.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    last_activity_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStatsSnapshot {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ProcessorStats {
    pub fn record_dispatched(&self, count: usize) {
        self.dispatched.fetch_add(count as u64, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        ProcessorStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_activity: (last > 0)
                .then(|| Utc.timestamp_millis_opt(last).single())
                .flatten(),
        }
    }
}

/// Orchestrator contract shared by the polling and queue backends.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Starts the background loops. Calling it twice is an error.
    async fn start(&self) -> Result<()>;

    /// Stops accepting work and waits for in-flight SubTasks to settle.
    async fn stop(&self) -> Result<()>;

    /// Registers a task and expands it into SubTasks.
    async fn process_task(&self, task: &Task) -> Result<ProcessTaskOutcome>;

    /// Executes one SubTask end to end. Safe to call repeatedly.
    async fn process_subtask(&self, subtask_id: &SubTaskId) -> Result<ProcessSubTaskOutcome>;

    async fn pause_task(&self, task_id: &TaskId) -> Result<bool>;
    async fn resume_task(&self, task_id: &TaskId) -> Result<bool>;
    async fn cancel_task(&self, task_id: &TaskId) -> Result<bool>;

    async fn task_progress(&self, task_id: &TaskId) -> Result<TaskProgress>;

    async fn health_check(&self) -> bool;

    fn stats(&self) -> ProcessorStatsSnapshot;

    /// Shared core, for the operations beyond the contract (retry, human
    /// review, score report).
    fn core(&self) -> &Arc<ProcessorCore>;
}
