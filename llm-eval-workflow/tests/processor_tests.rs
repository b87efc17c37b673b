mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use llm_eval_core::{
    CoreError, Dimension, Evaluator, EvaluatorConfig, FailureSource, Model, RegexCondition, SubTask,
    SubTaskFilter, SubTaskStatus, Task, TaskStatus, TaskStore, TestCase,
};
use llm_eval_inference::FailureClass;
use llm_eval_storage::InMemoryCatalog;
use llm_eval_workflow::{PollingProcessor, Processor, ProcessorConfig};

use common::{model, regex_evaluator, task, Behavior, Harness, ScriptedProvider};

struct Scenario {
    harness: Harness,
    model: Model,
    test_case: TestCase,
    dimension: Dimension,
    evaluator: Evaluator,
}

impl Scenario {
    fn new(primary: Behavior) -> Self {
        Self::with_evaluator(primary, regex_evaluator(r"\b4\b", 10.0))
    }

    fn with_evaluator(primary: Behavior, evaluator: Evaluator) -> Self {
        let dimension = Dimension::new("correctness", evaluator.id);
        let test_case = TestCase::new("What is 2+2?", 10.0).with_reference("4");
        let model = model("gpt", &["primary", "secondary"]);
        let catalog = InMemoryCatalog::new()
            .with_model(model.clone())
            .with_test_case(test_case.clone())
            .with_dimension(dimension.clone())
            .with_evaluator(evaluator.clone());
        let provider = ScriptedProvider::new(vec![("primary", primary)]);
        Self {
            harness: Harness::new(catalog, provider),
            model,
            test_case,
            dimension,
            evaluator,
        }
    }

    fn task(&self) -> Task {
        task(&[&self.model], &[&self.test_case], &[&self.dimension])
    }

    fn polling(&self) -> PollingProcessor {
        PollingProcessor::new(self.harness.core.clone())
    }

    async fn subtasks(&self, task: &Task) -> Vec<SubTask> {
        self.harness
            .store
            .list_subtasks(&SubTaskFilter::for_task(task.id))
            .await
            .unwrap()
    }

    async fn task_status(&self, task: &Task) -> TaskStatus {
        self.harness.store.get_task(&task.id).await.unwrap().unwrap().status
    }
}

fn answer() -> Behavior {
    Behavior::Reply("The answer is 4.".to_string())
}

#[tokio::test]
async fn test_end_to_end_regex_scoring() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();

    let outcome = processor.process_task(&task).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.subtasks_created, 1);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Queued);

    assert_eq!(processor.run_once().await.unwrap(), 1);

    let subtasks = sc.subtasks(&task).await;
    assert_eq!(subtasks[0].status, SubTaskStatus::Completed);
    assert_eq!(subtasks[0].raw_score, Some(10.0));
    assert_eq!(subtasks[0].model_response.as_deref(), Some("The answer is 4."));
    assert_eq!(subtasks[0].evaluator_id, sc.evaluator.id);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Completed);

    let progress = processor.task_progress(&task.id).await.unwrap();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.progress_percentage, 100.0);

    let stats = processor.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.completed, 1);
    assert!(stats.last_activity.is_some());
}

#[tokio::test]
async fn test_process_task_twice_creates_nothing_new() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();

    processor.process_task(&task).await.unwrap();
    let again = processor.process_task(&task).await.unwrap();

    assert!(again.success);
    assert_eq!(again.subtasks_created, 0);
    assert_eq!(sc.subtasks(&task).await.len(), 1);
}

#[tokio::test]
async fn test_reprocessing_completed_subtask_changes_nothing() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();
    processor.run_once().await.unwrap();

    let before = sc.subtasks(&task).await.remove(0);
    let calls = sc.harness.provider.calls().len();

    let outcome = processor.process_subtask(&before.id).await.unwrap();

    assert!(outcome.success);
    let after = sc.subtasks(&task).await.remove(0);
    assert_eq!(after, before);
    assert_eq!(sc.harness.provider.calls().len(), calls);
    let records = sc.harness.store.list_execution_records(&before.id).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_process_subtask_claims_pending_work_directly() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();
    let pending = sc.subtasks(&task).await.remove(0);

    let outcome = processor.process_subtask(&pending.id).await.unwrap();

    assert!(outcome.success);
    let done = sc.subtasks(&task).await.remove(0);
    assert_eq!(done.status, SubTaskStatus::Completed);
    assert_eq!(done.attempt_count, 1);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_failover_result_carries_secondary_provider_details() {
    let sc = Scenario::new(Behavior::Fail(FailureClass::Timeout));
    sc.harness.provider.set("secondary", answer());
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    processor.run_once().await.unwrap();

    assert_eq!(
        sc.harness.provider.calls(),
        vec!["primary", "primary", "secondary"]
    );
    let subtask = sc.subtasks(&task).await.remove(0);
    assert_eq!(subtask.status, SubTaskStatus::Completed);
    assert_eq!(subtask.token_usage.prompt_tokens, 20);
    assert_eq!(subtask.token_usage.completion_tokens, 5);

    let records = sc.harness.store.list_execution_records(&subtask.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider, "secondary");
    assert_eq!(records[0].model_identifier, "secondary-model");
    assert_eq!(records[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(sc.task_status(&task).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_exhausted_providers_fail_retryably_then_retry_succeeds() {
    let sc = Scenario::new(Behavior::Fail(FailureClass::Connection));
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    processor.run_once().await.unwrap();

    let failed = sc.subtasks(&task).await.remove(0);
    assert_eq!(failed.status, SubTaskStatus::Failed);
    assert_eq!(failed.raw_score, Some(0.0));
    let failure = failed.failure.clone().unwrap();
    assert_eq!(failure.source, FailureSource::Inference);
    assert!(failure.retryable);
    assert!(failed.error_message.unwrap().contains("all providers exhausted"));
    assert!(sc.harness.store.list_execution_records(&failed.id).await.unwrap().is_empty());
    assert_eq!(sc.task_status(&task).await, TaskStatus::Failed);

    sc.harness.provider.set("primary", answer());
    let retried = processor.core().retry_failed_subtasks(&task.id).await.unwrap();
    assert_eq!(retried, 1);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Running);

    processor.run_once().await.unwrap();

    let subtask = sc.subtasks(&task).await.remove(0);
    assert_eq!(subtask.status, SubTaskStatus::Completed);
    assert_eq!(subtask.raw_score, Some(10.0));
    assert_eq!(subtask.attempt_count, 2);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_retry_clears_zero_score_before_rerun() {
    let sc = Scenario::new(Behavior::Fail(FailureClass::Timeout));
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();
    processor.run_once().await.unwrap();
    let id = sc.subtasks(&task).await[0].id;

    assert!(processor.core().retry_subtask(&id).await.unwrap());

    let pending = sc.subtasks(&task).await.remove(0);
    assert_eq!(pending.status, SubTaskStatus::Pending);
    assert_eq!(pending.raw_score, None);
    assert!(pending.failure.is_none());
}

#[tokio::test]
async fn test_unscored_empty_result_is_downgraded() {
    let mut evaluator = regex_evaluator("never-present", 10.0);
    if let EvaluatorConfig::Regex(cfg) = &mut evaluator.config {
        cfg.condition = RegexCondition::NoMatch;
        cfg.score = f64::NAN;
    }
    let sc = Scenario::with_evaluator(Behavior::Reply(String::new()), evaluator);
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    processor.run_once().await.unwrap();

    let subtask = sc.subtasks(&task).await.remove(0);
    assert_eq!(subtask.status, SubTaskStatus::Failed);
    assert_eq!(subtask.raw_score, None);
    let failure = subtask.failure.unwrap();
    assert_eq!(failure.source, FailureSource::Consistency);
    assert!(failure.retryable);
    assert!(sc.harness.store.list_execution_records(&subtask.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_stops_after_retry_count() {
    let sc = Scenario::new(Behavior::Fail(FailureClass::Other));
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    processor.run_once().await.unwrap();
    let id = sc.subtasks(&task).await[0].id;
    assert!(processor.core().retry_subtask(&id).await.unwrap());

    processor.run_once().await.unwrap();
    assert!(!processor.core().retry_subtask(&id).await.unwrap());
    assert_eq!(sc.subtasks(&task).await[0].attempt_count, 2);
}

#[tokio::test]
async fn test_human_evaluation_mode_waits_for_review() {
    let sc = Scenario::new(answer());
    let mut task = sc.task();
    task.config.human_evaluation_mode = true;
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    processor.run_once().await.unwrap();

    let subtask = sc.subtasks(&task).await.remove(0);
    assert_eq!(subtask.status, SubTaskStatus::PendingHumanReview);
    assert_eq!(subtask.raw_score, None);
    assert_eq!(sc.harness.store.list_execution_records(&subtask.id).await.unwrap().len(), 1);

    let progress = processor.task_progress(&task.id).await.unwrap();
    assert_eq!(progress.pending_human_review, 1);
    assert!(!progress.is_complete());
    assert_eq!(sc.task_status(&task).await, TaskStatus::Running);

    let reviewed = processor
        .core()
        .submit_human_review(&subtask.id, 14.0, "clear and correct")
        .await
        .unwrap();
    assert_eq!(reviewed.raw_score, Some(10.0));
    assert_eq!(reviewed.status, SubTaskStatus::Completed);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Completed);

    let again = processor
        .core()
        .submit_human_review(&subtask.id, 5.0, "changed my mind")
        .await;
    assert!(matches!(again, Err(CoreError::InvalidState(_))));
}

#[tokio::test]
async fn test_cancel_marks_open_subtasks_cancelled() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    assert!(processor.cancel_task(&task.id).await.unwrap());

    assert!(sc
        .subtasks(&task)
        .await
        .iter()
        .all(|s| s.status == SubTaskStatus::Cancelled));
    assert_eq!(sc.task_status(&task).await, TaskStatus::Cancelled);
    assert_eq!(processor.run_once().await.unwrap(), 0);
    assert!(!processor.cancel_task(&task.id).await.unwrap());
}

#[tokio::test]
async fn test_running_result_is_discarded_after_cancel() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();

    let claimed = processor.core().dispatch().await.unwrap();
    assert_eq!(claimed.len(), 1);
    processor.cancel_task(&task.id).await.unwrap();

    let outcome = processor.process_subtask(&claimed[0].id).await.unwrap();

    assert!(outcome.success);
    let subtask = sc.subtasks(&task).await.remove(0);
    assert_eq!(subtask.status, SubTaskStatus::Cancelled);
    assert_eq!(subtask.raw_score, None);
    assert!(sc.harness.store.list_execution_records(&subtask.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pause_returns_work_and_resume_continues() {
    let sc = Scenario::new(answer());
    let task = sc.task();
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();
    let claimed = processor.core().dispatch().await.unwrap();
    assert_eq!(claimed.len(), 1);

    assert!(processor.pause_task(&task.id).await.unwrap());
    assert!(!processor.pause_task(&task.id).await.unwrap());

    let subtask = sc.subtasks(&task).await.remove(0);
    assert_eq!(subtask.status, SubTaskStatus::Pending);
    assert_eq!(subtask.error_message.as_deref(), Some("task paused"));
    assert_eq!(processor.run_once().await.unwrap(), 0);

    let skipped = processor.process_subtask(&subtask.id).await.unwrap();
    assert!(!skipped.success);
    assert_eq!(skipped.error.as_deref(), Some("task is paused"));

    assert!(processor.resume_task(&task.id).await.unwrap());
    assert_eq!(processor.run_once().await.unwrap(), 1);
    assert_eq!(sc.task_status(&task).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let sc = Scenario::new(answer());
    let mut task = sc.task();
    task.config.run_count = 0;

    let outcome = sc.polling().process_task(&task).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.is_some());
    let stored = sc.harness.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored.error_message.is_some());
    assert!(sc.subtasks(&task).await.is_empty());
}

#[tokio::test]
async fn test_unknown_test_case_is_rejected() {
    let sc = Scenario::new(answer());
    let stranger = TestCase::new("not in the catalog", 5.0);
    let task = task(&[&sc.model], &[&stranger], &[&sc.dimension]);

    let outcome = sc.polling().process_task(&task).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("unknown test case"));
    assert_eq!(sc.task_status(&task).await, TaskStatus::Failed);
}

#[tokio::test]
async fn test_health_check_tracks_store() {
    let sc = Scenario::new(answer());
    let processor = sc.polling();

    assert!(processor.health_check().await);
    sc.harness.store.set_available(false);
    assert!(!processor.health_check().await);
}

#[tokio::test]
async fn test_health_check_requires_credentials() {
    let evaluator = regex_evaluator("4", 1.0);
    let mut keyed = model("keyed", &["primary"]);
    keyed.providers[0].api_key_env = Some("LLM_EVAL_TEST_UNSET_KEY_1F3A".to_string());
    let catalog = InMemoryCatalog::new()
        .with_model(keyed)
        .with_evaluator(evaluator);
    let harness = Harness::new(catalog, ScriptedProvider::new(vec![]));

    assert!(!PollingProcessor::new(harness.core.clone()).health_check().await);
}

#[tokio::test]
async fn test_score_report_covers_every_run() {
    let sc = Scenario::new(answer());
    let mut task = sc.task();
    task.config.run_count = 2;
    let processor = sc.polling();
    processor.process_task(&task).await.unwrap();
    processor.run_once().await.unwrap();

    let report = processor.core().score_report(&task.id).await.unwrap();

    let score = report.find(sc.model.id, sc.dimension.id).unwrap();
    assert_eq!(score.runs.len(), 2);
    assert_eq!(score.overall_percentage, Some(100.0));
    assert_eq!(report.excluded, 0);
}

#[tokio::test]
async fn test_polling_loop_runs_task_to_completion() {
    let sc = Scenario::new(answer());
    let config = ProcessorConfig {
        poll_interval_ms: 10,
        ..Default::default()
    };
    let harness = Harness::with_options(
        InMemoryCatalog::new()
            .with_model(sc.model.clone())
            .with_test_case(sc.test_case.clone())
            .with_dimension(sc.dimension.clone())
            .with_evaluator(sc.evaluator.clone()),
        ScriptedProvider::new(vec![("primary", answer())]),
        None,
        config,
    );
    let processor = Arc::new(PollingProcessor::new(harness.core.clone()));
    let mut task = sc.task();
    task.config.run_count = 3;

    processor.start().await.unwrap();
    assert!(matches!(processor.start().await, Err(CoreError::InvalidState(_))));
    processor.process_task(&task).await.unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stored = harness.store.get_task(&task.id).await.unwrap().unwrap();
            if stored.is_terminal() {
                return stored.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    processor.stop().await.unwrap();
    assert_eq!(finished, TaskStatus::Completed);
    assert_eq!(processor.stats().completed, 3);
}
