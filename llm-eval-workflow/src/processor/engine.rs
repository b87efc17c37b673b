use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

use llm_eval_core::{
    Catalog, CoreError, EvaluatorConfig, EvaluatorType, ExecutionRecord, ExecutionRecordId,
    FailureSource, Result, SubTask, SubTaskFilter, SubTaskId, SubTaskStatus, Task, TaskId,
    TaskProgress, TaskStatus, TaskStore,
};
use llm_eval_inference::{InferenceClient, InferenceOutcome, InferenceRequest, InferenceResponse};
use llm_eval_metrics::ScoreReport;

use super::{ProcessSubTaskOutcome, ProcessTaskOutcome, ProcessorStats, ProcessorStatsSnapshot};
use crate::aggregator::TaskAggregator;
use crate::config::ProcessorConfig;
use crate::controller::{ConcurrencyController, DependencyState};
use crate::evaluators::{EvaluationContext, EvaluationOutcome, EvaluatorEngine, SandboxClient};
use crate::expansion::expand_task;

/// Result of running one claimed SubTask, before it is written back.
enum Execution {
    Scored {
        score: f64,
        justification: String,
        metadata: Value,
        response: InferenceResponse,
    },
    HumanReview {
        instructions: Option<String>,
        response: InferenceResponse,
    },
    Failed {
        message: String,
        source: FailureSource,
        retryable: bool,
        response: Option<InferenceResponse>,
    },
    /// Every provider in the chain was exhausted.
    Unanswered { message: String },
}

impl Execution {
    fn failed(message: impl Into<String>, source: FailureSource, retryable: bool) -> Self {
        Execution::Failed {
            message: message.into(),
            source,
            retryable,
            response: None,
        }
    }
}

/// Backend-independent orchestration: expansion, execution, write-back and
/// the task-level operations.
pub struct ProcessorCore {
    store: Arc<dyn TaskStore>,
    catalog: Arc<dyn Catalog>,
    inference: InferenceClient,
    evaluators: EvaluatorEngine,
    controller: ConcurrencyController,
    aggregator: TaskAggregator,
    config: ProcessorConfig,
    stats: ProcessorStats,
}

impl ProcessorCore {
    /// `inference` serves both the tested models and PROMPT judges.
    pub fn new(
        store: Arc<dyn TaskStore>,
        catalog: Arc<dyn Catalog>,
        inference: InferenceClient,
        sandbox: Option<Arc<dyn SandboxClient>>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            controller: ConcurrencyController::new(store.clone(), catalog.clone(), config.clone()),
            aggregator: TaskAggregator::new(store.clone()),
            evaluators: EvaluatorEngine::new(inference.clone(), sandbox),
            store,
            catalog,
            inference,
            config,
            stats: ProcessorStats::default(),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    pub fn aggregator(&self) -> &TaskAggregator {
        &self.aggregator
    }

    pub fn stats(&self) -> ProcessorStatsSnapshot {
        self.stats.snapshot()
    }

    /// One controller cycle. Returns the SubTasks claimed for execution.
    pub async fn dispatch(&self) -> Result<Vec<SubTask>> {
        let report = self.controller.dispatch_cycle().await?;
        for task_id in &report.tasks_to_refresh {
            self.aggregator.refresh(task_id).await?;
        }
        if !report.claimed.is_empty() {
            self.stats.record_dispatched(report.claimed.len());
        }
        Ok(report.claimed)
    }

    // ===== Task Expansion =====

    pub async fn process_task(&self, task: &Task) -> Result<ProcessTaskOutcome> {
        let mut current = match self.store.get_task(&task.id).await? {
            Some(existing) => existing,
            None => {
                self.store.insert_task(task).await?;
                task.clone()
            }
        };

        if current.is_terminal() {
            debug!(task_id = %current.id, status = current.status.as_str(), "Task already finished");
            return Ok(ProcessTaskOutcome::created(0));
        }
        if let Err(e) = current.validate() {
            return self.reject(current, e.to_string()).await;
        }

        if current.status == TaskStatus::Pending {
            current.set_status(TaskStatus::Preparing);
            if !self.store.update_task_if(&current, TaskStatus::Pending).await? {
                debug!(task_id = %current.id, "Task is being prepared elsewhere");
                return Ok(ProcessTaskOutcome::created(0));
            }
        }

        let existing = self.store.list_subtasks(&SubTaskFilter::for_task(current.id)).await?;
        let subtasks = match expand_task(&current, self.catalog.as_ref(), &existing).await {
            Ok(subtasks) => subtasks,
            Err(CoreError::Validation(reason) | CoreError::NotFound(reason)) => {
                return self.reject(current, reason).await
            }
            Err(e) => return Err(e),
        };
        let created = self.store.insert_subtasks(&subtasks).await?;

        if current.status == TaskStatus::Preparing {
            current.set_status(TaskStatus::Queued);
            self.store.update_task_if(&current, TaskStatus::Preparing).await?;
        }

        info!(
            task_id = %current.id,
            name = %current.name,
            created,
            total = existing.len() + created,
            "Task expanded"
        );
        Ok(ProcessTaskOutcome::created(created))
    }

    async fn reject(&self, mut task: Task, reason: String) -> Result<ProcessTaskOutcome> {
        let expected = task.status;
        task.fail(reason.clone());
        self.store.update_task_if(&task, expected).await?;
        warn!(task_id = %task.id, reason = %reason, "Task rejected");
        Ok(ProcessTaskOutcome::rejected(reason))
    }

    // ===== SubTask Execution =====

    pub async fn process_subtask(&self, subtask_id: &SubTaskId) -> Result<ProcessSubTaskOutcome> {
        let mut subtask = self
            .store
            .get_subtask(subtask_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("subtask {subtask_id}")))?;

        if subtask.is_terminal() || subtask.status == SubTaskStatus::PendingHumanReview {
            debug!(subtask_id = %subtask.id, status = subtask.status.as_str(), "SubTask already processed");
            return Ok(ProcessSubTaskOutcome::ok());
        }

        let task = self
            .store
            .get_task(&subtask.task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {}", subtask.task_id)))?;
        if !task.status.is_dispatchable() {
            return Ok(ProcessSubTaskOutcome::failed(format!(
                "task is {}",
                task.status.as_str()
            )));
        }

        if subtask.status == SubTaskStatus::Pending {
            match self.controller.resolve_dependencies(&mut subtask).await? {
                DependencyState::Satisfied => {}
                DependencyState::Waiting => {
                    return Ok(ProcessSubTaskOutcome::failed("dependencies not yet satisfied"))
                }
                DependencyState::Failed { .. } => {
                    self.stats.record_failed();
                    self.aggregator.refresh(&task.id).await?;
                    return Ok(ProcessSubTaskOutcome::failed(
                        subtask.error_message.unwrap_or_default(),
                    ));
                }
            }
            subtask = match self.controller.claim(subtask).await? {
                Some(claimed) => claimed,
                None => return Ok(ProcessSubTaskOutcome::failed("claimed by another worker")),
            };
            self.controller.mark_task_started(&task).await?;
        }

        let execution = self.execute(&task, &subtask).await?;
        self.write_back(&task, subtask, execution).await
    }

    async fn execute(&self, task: &Task, subtask: &SubTask) -> Result<Execution> {
        let Some(model) = self.catalog.get_model(&subtask.model_id).await? else {
            return Ok(Execution::failed(
                format!("model {} not found", subtask.model_id),
                FailureSource::Inference,
                false,
            ));
        };
        let test_case = self.catalog.get_test_case(&subtask.test_case_id).await?;
        let dimension = self.catalog.get_dimension(&subtask.dimension_id).await?;
        let evaluator = self.catalog.get_evaluator(&subtask.evaluator_id).await?;
        let (Some(test_case), Some(dimension), Some(evaluator)) = (test_case, dimension, evaluator)
        else {
            return Ok(Execution::failed(
                "test case, dimension or evaluator no longer exists",
                FailureSource::Evaluator,
                false,
            ));
        };

        let mut request = InferenceRequest::new(test_case.input.clone())
            .with_attachments(test_case.attachments.clone())
            .with_timeout(Duration::from_secs(task.config.timeout_secs));
        if let Some(system_prompt) = &test_case.system_prompt {
            request = request.with_system_prompt(system_prompt.clone());
        }
        if let Some(temperature) = task.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = task.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = match self.inference.complete_with_model(&model, &request).await {
            InferenceOutcome::Completed(response) => response,
            unavailable => {
                return Ok(Execution::Unanswered {
                    message: format!(
                        "all providers exhausted: {}",
                        unavailable.failure_summary().unwrap_or_default()
                    ),
                })
            }
        };

        if task.config.human_evaluation_mode || evaluator.evaluator_type() == EvaluatorType::Human {
            let instructions = match &evaluator.config {
                EvaluatorConfig::Human(cfg) => cfg.instructions.clone(),
                _ => None,
            };
            return Ok(Execution::HumanReview {
                instructions,
                response,
            });
        }

        let model_stats = self.inference.stats().snapshot(&response.provider);
        let ctx = EvaluationContext {
            test_case: &test_case,
            response: &response.content,
            dimension: &dimension,
            evaluator: &evaluator,
            model_stats: model_stats.as_ref(),
        };

        Ok(match self.evaluators.evaluate(&ctx).await {
            Ok(EvaluationOutcome::Scored {
                score,
                justification,
                metadata,
            }) => Execution::Scored {
                score,
                justification,
                metadata,
                response,
            },
            Ok(EvaluationOutcome::HumanReview { instructions }) => Execution::HumanReview {
                instructions,
                response,
            },
            Err(e) => Execution::Failed {
                message: e.to_string(),
                source: FailureSource::Evaluator,
                retryable: e.is_retryable(),
                response: Some(response),
            },
        })
    }

    /// Persists the outcome with a `running → *` conditional write. Only the
    /// winner of that write records execution details.
    async fn write_back(
        &self,
        task: &Task,
        mut subtask: SubTask,
        execution: Execution,
    ) -> Result<ProcessSubTaskOutcome> {
        let (response, metadata) = match execution {
            Execution::Scored {
                score,
                justification,
                metadata,
                response,
            } => {
                record_response(&mut subtask, &response);
                subtask.complete(score, justification);
                subtask.enforce_consistency();
                (Some(response), metadata)
            }
            Execution::HumanReview {
                instructions,
                response,
            } => {
                record_response(&mut subtask, &response);
                subtask.await_human_review();
                (Some(response), json!({ "instructions": instructions }))
            }
            Execution::Failed {
                message,
                source,
                retryable,
                response,
            } => {
                if let Some(response) = &response {
                    record_response(&mut subtask, response);
                }
                subtask.fail(message, source, retryable);
                (None, Value::Null)
            }
            Execution::Unanswered { message } => {
                subtask.fail_unanswered(message);
                (None, Value::Null)
            }
        };

        if !self.store.update_subtask_if(&subtask, SubTaskStatus::Running).await? {
            warn!(
                subtask_id = %subtask.id,
                task_id = %task.id,
                "SubTask changed while executing; result discarded"
            );
            return Ok(ProcessSubTaskOutcome::failed("result discarded: status changed"));
        }

        if let Some(response) = response.filter(|_| subtask.status != SubTaskStatus::Failed) {
            self.store
                .insert_execution_record(&ExecutionRecord {
                    id: ExecutionRecordId::new(),
                    subtask_id: subtask.id,
                    task_id: task.id,
                    provider: response.provider,
                    model_identifier: response.model_identifier,
                    latency_ms: response.latency_ms,
                    token_usage: response.usage,
                    finish_reason: response.finish_reason,
                    evaluator_metadata: metadata,
                    created_at: Utc::now(),
                })
                .await?;
        }

        let outcome = match subtask.status {
            SubTaskStatus::Failed => {
                self.stats.record_failed();
                warn!(
                    subtask_id = %subtask.id,
                    task_id = %task.id,
                    error = subtask.error_message.as_deref().unwrap_or(""),
                    "SubTask failed"
                );
                ProcessSubTaskOutcome::failed(subtask.error_message.clone().unwrap_or_default())
            }
            status => {
                self.stats.record_completed();
                debug!(
                    subtask_id = %subtask.id,
                    status = status.as_str(),
                    raw_score = subtask.raw_score,
                    "SubTask processed"
                );
                ProcessSubTaskOutcome::ok()
            }
        };

        self.aggregator.refresh(&task.id).await?;
        Ok(outcome)
    }

    // ===== Task Controls =====

    pub async fn pause_task(&self, task_id: &TaskId) -> Result<bool> {
        let mut task = self.require_task(task_id).await?;
        if task.is_terminal() || task.status == TaskStatus::Paused {
            return Ok(false);
        }
        let expected = task.status;
        task.set_status(TaskStatus::Paused);
        if !self.store.update_task_if(&task, expected).await? {
            return Ok(false);
        }

        let running = self
            .store
            .list_subtasks(&SubTaskFilter::for_task(*task_id).statuses(&[SubTaskStatus::Running]))
            .await?;
        let mut returned = 0;
        for mut subtask in running {
            subtask.reset_to_pending("task paused");
            if self.store.update_subtask_if(&subtask, SubTaskStatus::Running).await? {
                returned += 1;
            }
        }
        info!(task_id = %task_id, returned_to_pending = returned, "Task paused");
        Ok(true)
    }

    pub async fn resume_task(&self, task_id: &TaskId) -> Result<bool> {
        let mut task = self.require_task(task_id).await?;
        if task.status != TaskStatus::Paused {
            return Ok(false);
        }
        task.set_status(TaskStatus::Queued);
        let resumed = self.store.update_task_if(&task, TaskStatus::Paused).await?;
        if resumed {
            info!(task_id = %task_id, "Task resumed");
        }
        Ok(resumed)
    }

    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<bool> {
        let mut task = self.require_task(task_id).await?;
        if task.is_terminal() {
            return Ok(false);
        }

        let open = self
            .store
            .list_subtasks(&SubTaskFilter::for_task(*task_id).statuses(&[
                SubTaskStatus::Pending,
                SubTaskStatus::Running,
                SubTaskStatus::PendingHumanReview,
            ]))
            .await?;
        let mut cancelled = 0;
        for mut subtask in open {
            let expected = subtask.status;
            subtask.cancel();
            if self.store.update_subtask_if(&subtask, expected).await? {
                cancelled += 1;
            }
        }

        let expected = task.status;
        task.finish(TaskStatus::Cancelled);
        if !self.store.update_task_if(&task, expected).await? {
            warn!(task_id = %task_id, "Task changed while cancelling");
            return Ok(false);
        }
        info!(task_id = %task_id, cancelled, "Task cancelled");
        Ok(true)
    }

    pub async fn task_progress(&self, task_id: &TaskId) -> Result<TaskProgress> {
        self.aggregator.progress(task_id).await
    }

    pub async fn score_report(&self, task_id: &TaskId) -> Result<ScoreReport> {
        self.aggregator.report(task_id).await
    }

    /// Store reachable and every active model has a usable credential.
    pub async fn health_check(&self) -> bool {
        if let Err(e) = self.store.ping().await {
            warn!(error = %e, "Store health check failed");
            return false;
        }
        match self.inference.models_without_credentials().await {
            Ok(missing) if missing.is_empty() => true,
            Ok(missing) => {
                warn!(models = ?missing, "Models without provider credentials");
                false
            }
            Err(e) => {
                warn!(error = %e, "Credential check failed");
                false
            }
        }
    }

    // ===== Retry & Human Review =====

    /// Returns a retryable failed SubTask to `pending` and reopens its task.
    pub async fn retry_subtask(&self, subtask_id: &SubTaskId) -> Result<bool> {
        let mut subtask = self
            .store
            .get_subtask(subtask_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("subtask {subtask_id}")))?;
        let task = self.require_task(&subtask.task_id).await?;
        if task.status == TaskStatus::Cancelled || !subtask.is_retryable(task.config.retry_count) {
            return Ok(false);
        }

        let reason = subtask.error_message.take().unwrap_or_default();
        subtask.reset_to_pending(format!("retrying after: {reason}"));
        subtask.raw_score = None;
        subtask.failure = None;
        subtask.completed_at = None;
        if !subtask.depends_on.is_empty() {
            subtask.dependencies_resolved = false;
        }
        if !self.store.update_subtask_if(&subtask, SubTaskStatus::Failed).await? {
            return Ok(false);
        }

        if task.is_terminal() {
            let mut reopened = task.clone();
            reopened.set_status(TaskStatus::Running);
            reopened.finished_at = None;
            reopened.error_message = None;
            self.store.update_task_if(&reopened, task.status).await?;
        }
        info!(
            subtask_id = %subtask_id,
            task_id = %task.id,
            attempt = subtask.attempt_count + 1,
            "SubTask resubmitted"
        );
        Ok(true)
    }

    /// Retries every retryable failed SubTask of a task. Returns how many
    /// were resubmitted.
    pub async fn retry_failed_subtasks(&self, task_id: &TaskId) -> Result<usize> {
        self.require_task(task_id).await?;
        let failed = self
            .store
            .list_subtasks(&SubTaskFilter::for_task(*task_id).statuses(&[SubTaskStatus::Failed]))
            .await?;
        let mut retried = 0;
        for subtask in failed {
            if self.retry_subtask(&subtask.id).await? {
                retried += 1;
            }
        }
        Ok(retried)
    }

    /// Writes a reviewer's score back. The score is clamped to
    /// `[0, max_score]`.
    pub async fn submit_human_review(
        &self,
        subtask_id: &SubTaskId,
        score: f64,
        justification: &str,
    ) -> Result<SubTask> {
        let mut subtask = self
            .store
            .get_subtask(subtask_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("subtask {subtask_id}")))?;
        if subtask.status != SubTaskStatus::PendingHumanReview {
            return Err(CoreError::InvalidState(format!(
                "subtask {subtask_id} is {}, not awaiting review",
                subtask.status.as_str()
            )));
        }
        if !score.is_finite() {
            return Err(CoreError::Validation("review score must be a number".to_string()));
        }

        subtask.complete(score, justification);
        if !self
            .store
            .update_subtask_if(&subtask, SubTaskStatus::PendingHumanReview)
            .await?
        {
            return Err(CoreError::Conflict(format!(
                "subtask {subtask_id} changed during review"
            )));
        }
        self.stats.record_completed();
        info!(subtask_id = %subtask_id, raw_score = subtask.raw_score, "Human review recorded");
        self.aggregator.refresh(&subtask.task_id).await?;
        Ok(subtask)
    }

    async fn require_task(&self, task_id: &TaskId) -> Result<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("task {task_id}")))
    }
}

fn record_response(subtask: &mut SubTask, response: &InferenceResponse) {
    subtask.model_response = Some(response.content.clone());
    subtask.token_usage = response.usage;
}
