mod common;

use pretty_assertions::assert_eq;
use std::collections::HashSet;

use llm_eval_core::{CoreError, Dimension, TaskConfig, TestCase};
use llm_eval_storage::InMemoryCatalog;
use llm_eval_workflow::expand_task;

use common::{model, regex_evaluator, task};

#[tokio::test]
async fn test_expansion_covers_full_cross_product() {
    let evaluator = regex_evaluator("yes", 1.0);
    let dimension = Dimension::new("correctness", evaluator.id).with_priority(3);
    let (m1, m2) = (model("gpt", &["a"]), model("claude", &["b"]));
    let (t1, t2) = (TestCase::new("q1", 10.0), TestCase::new("q2", 20.0));
    let catalog = InMemoryCatalog::new()
        .with_model(m1.clone())
        .with_model(m2.clone())
        .with_test_case(t1.clone())
        .with_test_case(t2.clone())
        .with_dimension(dimension.clone())
        .with_evaluator(evaluator.clone());

    let mut task = task(&[&m1, &m2], &[&t1, &t2], &[&dimension]);
    task.config.run_count = 3;

    let subtasks = expand_task(&task, &catalog, &[]).await.unwrap();

    assert_eq!(subtasks.len(), 12);
    assert_eq!(task.config.expected_subtasks(), 12);
    let keys: HashSet<_> = subtasks.iter().map(|s| s.key()).collect();
    assert_eq!(keys.len(), 12);
    assert!(subtasks.iter().all(|s| s.execution_priority == 3 && s.evaluator_id == evaluator.id));
    assert!(subtasks
        .iter()
        .filter(|s| s.test_case_id == t2.id)
        .all(|s| s.max_score == 20.0));
    let repetitions: HashSet<u32> = subtasks.iter().map(|s| s.repetition_index).collect();
    assert_eq!(repetitions, HashSet::from([0, 1, 2]));
}

#[tokio::test]
async fn test_expansion_skips_existing_subtasks() {
    let evaluator = regex_evaluator("yes", 1.0);
    let dimension = Dimension::new("correctness", evaluator.id);
    let m = model("gpt", &["a"]);
    let (t1, t2) = (TestCase::new("q1", 10.0), TestCase::new("q2", 10.0));
    let catalog = InMemoryCatalog::new()
        .with_model(m.clone())
        .with_test_case(t1.clone())
        .with_test_case(t2.clone())
        .with_dimension(dimension.clone())
        .with_evaluator(evaluator);
    let task = task(&[&m], &[&t1, &t2], &[&dimension]);

    let first = expand_task(&task, &catalog, &[]).await.unwrap();
    let partial = vec![first[0].clone()];
    let rest = expand_task(&task, &catalog, &partial).await.unwrap();
    let none = expand_task(&task, &catalog, &first).await.unwrap();

    assert_eq!(rest.len(), 1);
    assert_ne!(rest[0].key(), first[0].key());
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_dependencies_link_sibling_subtasks() {
    let evaluator = regex_evaluator("yes", 1.0);
    let correctness = Dimension::new("correctness", evaluator.id);
    let explanation = Dimension::new("explanation", evaluator.id).depending_on(vec![correctness.id]);
    let m = model("gpt", &["a"]);
    let t = TestCase::new("q1", 10.0);
    let catalog = InMemoryCatalog::new()
        .with_model(m.clone())
        .with_test_case(t.clone())
        .with_dimension(correctness.clone())
        .with_dimension(explanation.clone())
        .with_evaluator(evaluator);
    let mut task = task(&[&m], &[&t], &[&explanation, &correctness]);
    task.config.run_count = 2;

    let subtasks = expand_task(&task, &catalog, &[]).await.unwrap();

    for dependent in subtasks.iter().filter(|s| s.dimension_id == explanation.id) {
        assert_eq!(dependent.depends_on.len(), 1);
        let dependency = subtasks
            .iter()
            .find(|s| s.id == dependent.depends_on[0])
            .unwrap();
        assert_eq!(dependency.dimension_id, correctness.id);
        assert_eq!(dependency.repetition_index, dependent.repetition_index);
    }
    assert!(subtasks
        .iter()
        .filter(|s| s.dimension_id == correctness.id)
        .all(|s| s.depends_on.is_empty()));
}

#[tokio::test]
async fn test_out_of_scope_dependency_is_ignored() {
    let evaluator = regex_evaluator("yes", 1.0);
    let elsewhere = Dimension::new("style", evaluator.id);
    let dimension = Dimension::new("correctness", evaluator.id).depending_on(vec![elsewhere.id]);
    let m = model("gpt", &["a"]);
    let t = TestCase::new("q1", 10.0);
    let catalog = InMemoryCatalog::new()
        .with_model(m.clone())
        .with_test_case(t.clone())
        .with_dimension(dimension.clone())
        .with_evaluator(evaluator);

    let subtasks = expand_task(&task(&[&m], &[&t], &[&dimension]), &catalog, &[])
        .await
        .unwrap();

    assert!(subtasks[0].depends_on.is_empty());
}

#[tokio::test]
async fn test_dependency_cycle_is_rejected() {
    let evaluator = regex_evaluator("yes", 1.0);
    let first = Dimension::new("first", evaluator.id);
    let second = Dimension::new("second", evaluator.id).depending_on(vec![first.id]);
    let first = first.depending_on(vec![second.id]);
    let m = model("gpt", &["a"]);
    let t = TestCase::new("q1", 10.0);
    let catalog = InMemoryCatalog::new()
        .with_model(m.clone())
        .with_test_case(t.clone())
        .with_dimension(first.clone())
        .with_dimension(second.clone())
        .with_evaluator(evaluator);

    let err = expand_task(&task(&[&m], &[&t], &[&first, &second]), &catalog, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Validation(msg) if msg.contains("cycle")));
}

#[tokio::test]
async fn test_empty_config_is_rejected() {
    let task = llm_eval_core::Task::new("empty", TaskConfig::default());
    let err = expand_task(&task, &InMemoryCatalog::new(), &[]).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}
