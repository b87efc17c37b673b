//! Dependency & Concurrency Controller.
//!
//! Each dispatch cycle resets zombies, then picks pending SubTasks in
//! priority order while honouring the global, per-task and per-model
//! budgets. Every claim is a conditional `pending → running` write, so two
//! controllers racing over the same store never claim the same SubTask.

use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use llm_eval_core::{
    Catalog, FailureSource, ModelId, Result, SubTask, SubTaskFilter, SubTaskId, SubTaskStatus,
    Task, TaskId, TaskStatus, TaskStore,
};

use crate::config::ProcessorConfig;

/// Where a SubTask stands with respect to the SubTasks it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    Satisfied,
    Waiting,
    Failed {
        dependency: SubTaskId,
        status: Option<SubTaskStatus>,
    },
}

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Claimed SubTasks, already `running` in the store.
    pub claimed: Vec<SubTask>,
    pub zombies_reset: usize,
    /// Tasks that had a SubTask failed on a dependency, or no pending work
    /// left. Their completion status needs re-evaluating.
    pub tasks_to_refresh: BTreeSet<TaskId>,
}

pub struct ConcurrencyController {
    store: Arc<dyn TaskStore>,
    catalog: Arc<dyn Catalog>,
    config: ProcessorConfig,
}

impl ConcurrencyController {
    pub fn new(store: Arc<dyn TaskStore>, catalog: Arc<dyn Catalog>, config: ProcessorConfig) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    /// Resets every SubTask stuck in `running` past the zombie timeout.
    pub async fn sweep_zombies(&self) -> Result<usize> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.zombie_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(self.config.zombie_timeout_secs as i64));
        let filter = SubTaskFilter::with_status(SubTaskStatus::Running).updated_before(now - timeout);

        let mut reset = 0;
        for mut subtask in self.store.list_subtasks(&filter).await? {
            let since = subtask.started_at.unwrap_or(subtask.updated_at);
            let elapsed = (now - since).num_seconds().max(0);
            subtask.reset_to_pending(format!(
                "reset after {elapsed}s in running without completing"
            ));

            if self.store.update_subtask_if(&subtask, SubTaskStatus::Running).await? {
                warn!(
                    subtask_id = %subtask.id,
                    task_id = %subtask.task_id,
                    elapsed_secs = elapsed,
                    "Zombie SubTask reset to pending"
                );
                reset += 1;
            }
        }
        Ok(reset)
    }

    pub async fn dependency_state(&self, subtask: &SubTask) -> Result<DependencyState> {
        let mut waiting = false;
        for dependency in &subtask.depends_on {
            let status = self.store.get_subtask(dependency).await?.map(|d| d.status);
            match status {
                Some(SubTaskStatus::Completed) => {}
                Some(SubTaskStatus::Failed | SubTaskStatus::Cancelled) | None => {
                    return Ok(DependencyState::Failed {
                        dependency: *dependency,
                        status,
                    })
                }
                Some(_) => waiting = true,
            }
        }
        Ok(if waiting {
            DependencyState::Waiting
        } else {
            DependencyState::Satisfied
        })
    }

    /// Re-evaluates the dependencies of a pending SubTask and persists the
    /// outcome: satisfied marks it resolved, a failed dependency fails it.
    ///
    /// `subtask` is updated in place when the write succeeds. A lost write
    /// is reported as `Waiting` so the caller leaves the SubTask alone.
    pub async fn resolve_dependencies(&self, subtask: &mut SubTask) -> Result<DependencyState> {
        if subtask.dependencies_resolved {
            return Ok(DependencyState::Satisfied);
        }

        let state = self.dependency_state(subtask).await?;
        let mut updated = subtask.clone();
        match &state {
            DependencyState::Waiting => return Ok(state),
            DependencyState::Satisfied => {
                updated.dependencies_resolved = true;
                updated.updated_at = Utc::now();
            }
            DependencyState::Failed { dependency, status } => {
                let status = status.map(|s| s.as_str()).unwrap_or("missing");
                updated.fail(
                    format!("dependency {dependency} is {status}"),
                    FailureSource::Dependency,
                    true,
                );
            }
        }

        if !self.store.update_subtask_if(&updated, SubTaskStatus::Pending).await? {
            debug!(subtask_id = %subtask.id, "Dependency update lost to another writer");
            return Ok(DependencyState::Waiting);
        }
        if let DependencyState::Failed { dependency, .. } = &state {
            warn!(
                subtask_id = %subtask.id,
                dependency = %dependency,
                "SubTask failed on dependency"
            );
        }
        *subtask = updated;
        Ok(state)
    }

    /// Moves a pending SubTask to `running`. Returns `None` when another
    /// worker claimed it first.
    pub async fn claim(&self, mut subtask: SubTask) -> Result<Option<SubTask>> {
        subtask.start();
        if !self.store.update_subtask_if(&subtask, SubTaskStatus::Pending).await? {
            debug!(subtask_id = %subtask.id, "Claim lost to another worker");
            return Ok(None);
        }
        Ok(Some(subtask))
    }

    /// Marks a queued task running on its first dispatch.
    pub async fn mark_task_started(&self, task: &Task) -> Result<()> {
        if task.status != TaskStatus::Queued {
            return Ok(());
        }
        let mut started = task.clone();
        started.mark_started();
        if self.store.update_task_if(&started, TaskStatus::Queued).await? {
            info!(task_id = %task.id, "Task started");
        }
        Ok(())
    }

    pub async fn dispatch_cycle(&self) -> Result<DispatchReport> {
        let mut report = DispatchReport {
            zombies_reset: self.sweep_zombies().await?,
            ..Default::default()
        };

        let global_limit = self.config.global_concurrency_limit;
        let running = self
            .store
            .count_subtasks(&SubTaskFilter::with_status(SubTaskStatus::Running))
            .await?;
        let mut global_budget = global_limit.saturating_sub(running);

        let tasks = self
            .store
            .list_tasks(&[TaskStatus::Queued, TaskStatus::Running])
            .await?;

        let mut task_budgets: HashMap<TaskId, usize> = HashMap::new();
        let mut candidates: Vec<SubTask> = Vec::new();
        for task in &tasks {
            let pending = self
                .store
                .list_subtasks(&SubTaskFilter::for_task(task.id).statuses(&[SubTaskStatus::Pending]))
                .await?;
            if pending.is_empty() {
                report.tasks_to_refresh.insert(task.id);
                continue;
            }
            let running_for_task = self
                .store
                .count_subtasks(&SubTaskFilter::for_task(task.id).statuses(&[SubTaskStatus::Running]))
                .await?;
            let limit = (task.config.concurrency_limit as usize).min(global_limit);
            task_budgets.insert(task.id, limit.saturating_sub(running_for_task));
            candidates.extend(pending);
        }

        candidates.sort_by(|a, b| {
            (a.execution_priority, a.evaluator_type.dispatch_priority(), a.created_at).cmp(&(
                b.execution_priority,
                b.evaluator_type.dispatch_priority(),
                b.created_at,
            ))
        });

        let tasks_by_id: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let mut model_budgets: HashMap<ModelId, usize> = HashMap::new();

        for mut subtask in candidates {
            if global_budget == 0 {
                break;
            }
            if task_budgets.get(&subtask.task_id).copied().unwrap_or(0) == 0 {
                continue;
            }

            match self.resolve_dependencies(&mut subtask).await? {
                DependencyState::Satisfied => {}
                DependencyState::Waiting => continue,
                DependencyState::Failed { .. } => {
                    report.tasks_to_refresh.insert(subtask.task_id);
                    continue;
                }
            }

            let model_budget = match model_budgets.get(&subtask.model_id) {
                Some(budget) => *budget,
                None => {
                    let budget = self.model_budget(subtask.model_id, global_limit).await?;
                    model_budgets.insert(subtask.model_id, budget);
                    budget
                }
            };
            if model_budget == 0 {
                continue;
            }

            let task_id = subtask.task_id;
            let model_id = subtask.model_id;
            let Some(claimed) = self.claim(subtask).await? else {
                continue;
            };

            global_budget -= 1;
            if let Some(budget) = task_budgets.get_mut(&task_id) {
                *budget -= 1;
            }
            if let Some(budget) = model_budgets.get_mut(&model_id) {
                *budget -= 1;
            }
            if let Some(task) = tasks_by_id.get(&task_id) {
                self.mark_task_started(task).await?;
            }
            report.claimed.push(claimed);
        }

        if !report.claimed.is_empty() || report.zombies_reset > 0 {
            debug!(
                claimed = report.claimed.len(),
                zombies_reset = report.zombies_reset,
                global_budget_left = global_budget,
                "Dispatch cycle finished"
            );
        }
        Ok(report)
    }

    async fn model_budget(&self, model_id: ModelId, global_limit: usize) -> Result<usize> {
        let limit = self
            .catalog
            .get_model(&model_id)
            .await?
            .map(|m| m.concurrent_limit as usize)
            .unwrap_or(global_limit);
        let running = self
            .store
            .count_subtasks(&SubTaskFilter::with_status(SubTaskStatus::Running).model(model_id))
            .await?;
        Ok(limit.saturating_sub(running))
    }
}
