use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use llm_eval_core::{
    CoreError, DimensionId, EvaluatorId, EvaluatorType, ModelId, SubTask, SubTaskFilter,
    SubTaskKey, SubTaskStatus, Task, TaskConfig, TaskStatus, TaskStore, TestCaseId,
};
use llm_eval_storage::InMemoryStore;

fn task() -> Task {
    Task::new(
        "store-test",
        TaskConfig {
            models: vec![ModelId::new()],
            test_cases: vec![TestCaseId::new()],
            dimensions: vec![DimensionId::new()],
            ..Default::default()
        },
    )
}

fn subtask(task: &Task, repetition: u32) -> SubTask {
    SubTask::new(
        SubTaskKey {
            task_id: task.id,
            model_id: task.config.models[0],
            dimension_id: task.config.dimensions[0],
            test_case_id: task.config.test_cases[0],
            repetition_index: repetition,
        },
        EvaluatorId::new(),
        EvaluatorType::Regex,
        10.0,
    )
}

#[tokio::test]
async fn test_insert_subtasks_skips_existing_keys() {
    let store = InMemoryStore::new();
    let task = task();
    store.insert_task(&task).await.unwrap();

    let first = vec![subtask(&task, 0), subtask(&task, 1)];
    assert_eq!(store.insert_subtasks(&first).await.unwrap(), 2);

    // Same natural keys, fresh ids.
    let again = vec![subtask(&task, 0), subtask(&task, 1), subtask(&task, 2)];
    assert_eq!(store.insert_subtasks(&again).await.unwrap(), 1);
    assert_eq!(
        store
            .count_subtasks(&SubTaskFilter::for_task(task.id))
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_conditional_update_rejects_stale_status() {
    let store = InMemoryStore::new();
    let task = task();
    store.insert_task(&task).await.unwrap();
    let st = subtask(&task, 0);
    store.insert_subtasks(&[st.clone()]).await.unwrap();

    let mut claimed = st.clone();
    claimed.start();
    assert!(store
        .update_subtask_if(&claimed, SubTaskStatus::Pending)
        .await
        .unwrap());

    let mut second = st.clone();
    second.start();
    assert!(!store
        .update_subtask_if(&second, SubTaskStatus::Pending)
        .await
        .unwrap());

    let stored = store.get_subtask(&st.id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 1);
}

#[tokio::test]
async fn test_concurrent_claims_have_one_winner() {
    let store = Arc::new(InMemoryStore::new());
    let task = task();
    store.insert_task(&task).await.unwrap();
    let st = subtask(&task, 0);
    store.insert_subtasks(&[st.clone()]).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let mut copy = st.clone();
        handles.push(tokio::spawn(async move {
            copy.start();
            store
                .update_subtask_if(&copy, SubTaskStatus::Pending)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_filter_by_status_and_age() {
    let store = InMemoryStore::new();
    let task = task();
    store.insert_task(&task).await.unwrap();

    let mut stale = subtask(&task, 0);
    stale.start();
    stale.updated_at = Utc::now() - ChronoDuration::minutes(30);
    let fresh = subtask(&task, 1);
    store.insert_subtasks(&[stale.clone(), fresh]).await.unwrap();

    let cutoff = Utc::now() - ChronoDuration::minutes(10);
    let found = store
        .list_subtasks(
            &SubTaskFilter::with_status(SubTaskStatus::Running).updated_before(cutoff),
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale.id);
}

#[tokio::test]
async fn test_task_update_if() {
    let store = InMemoryStore::new();
    let mut task = task();
    store.insert_task(&task).await.unwrap();

    task.set_status(TaskStatus::Queued);
    assert!(store.update_task_if(&task, TaskStatus::Pending).await.unwrap());
    assert!(!store.update_task_if(&task, TaskStatus::Pending).await.unwrap());

    let listed = store.list_tasks(&[TaskStatus::Queued]).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn test_unavailable_store_fails_every_call() {
    let store = InMemoryStore::new();
    store.set_available(false);

    let err = store.ping().await.unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)));
    assert!(err.is_infrastructure());

    store.set_available(true);
    assert!(store.ping().await.is_ok());
}
