//! Task-Completion Aggregator: progress counts and the terminal status of a
//! task once every SubTask has settled.

use std::sync::Arc;
use tracing::{debug, info};

use llm_eval_core::{
    CoreError, Result, SubTask, SubTaskFilter, SubTaskStatus, TaskId, TaskProgress, TaskStatus,
    TaskStore,
};
use llm_eval_metrics::{round_dp, ScoreReport};

/// Attempts at the final task write before leaving it to the next refresh.
const FINALIZE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct TaskAggregator {
    store: Arc<dyn TaskStore>,
}

impl TaskAggregator {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn summarize<'a>(subtasks: impl IntoIterator<Item = &'a SubTask>) -> TaskProgress {
        let mut progress = TaskProgress::default();
        for subtask in subtasks {
            progress.total += 1;
            match subtask.status {
                SubTaskStatus::Pending => progress.pending += 1,
                SubTaskStatus::Running => progress.running += 1,
                SubTaskStatus::Completed => progress.completed += 1,
                SubTaskStatus::Failed => progress.failed += 1,
                SubTaskStatus::Cancelled => progress.cancelled += 1,
                SubTaskStatus::PendingHumanReview => progress.pending_human_review += 1,
            }
        }
        if progress.total > 0 {
            progress.progress_percentage =
                round_dp(progress.terminal() as f64 / progress.total as f64 * 100.0, 1);
        }
        progress
    }

    /// Terminal status implied by a fully settled set of SubTasks.
    pub fn completion_status(progress: &TaskProgress) -> Option<TaskStatus> {
        if !progress.is_complete() {
            return None;
        }
        Some(if progress.failed == 0 && progress.cancelled == 0 {
            TaskStatus::Completed
        } else if progress.completed == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::CompletedWithErrors
        })
    }

    pub async fn progress(&self, task_id: &TaskId) -> Result<TaskProgress> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        }
        let subtasks = self.store.list_subtasks(&SubTaskFilter::for_task(*task_id)).await?;
        Ok(Self::summarize(&subtasks))
    }

    /// Finishes the task when all of its SubTasks are terminal. Returns the
    /// status written, or `None` when the task stays as it is.
    pub async fn refresh(&self, task_id: &TaskId) -> Result<Option<TaskStatus>> {
        for _ in 0..FINALIZE_ATTEMPTS {
            let mut task = self
                .store
                .get_task(task_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))?;
            if task.is_terminal() {
                return Ok(None);
            }

            let progress = self.progress(task_id).await?;
            let Some(status) = Self::completion_status(&progress) else {
                return Ok(None);
            };

            let expected = task.status;
            task.finish(status);
            if status == TaskStatus::Failed {
                task.error_message = Some(format!("all {} SubTasks failed", progress.failed));
            }
            if self.store.update_task_if(&task, expected).await? {
                info!(
                    task_id = %task_id,
                    status = status.as_str(),
                    completed = progress.completed,
                    failed = progress.failed,
                    cancelled = progress.cancelled,
                    "Task finished"
                );
                return Ok(Some(status));
            }
            debug!(task_id = %task_id, "Task status changed during finalize; retrying");
        }
        Ok(None)
    }

    pub async fn report(&self, task_id: &TaskId) -> Result<ScoreReport> {
        if self.store.get_task(task_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("task {task_id}")));
        }
        let subtasks = self.store.list_subtasks(&SubTaskFilter::for_task(*task_id)).await?;
        Ok(ScoreReport::from_subtasks(&subtasks))
    }
}
