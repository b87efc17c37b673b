//! Turns a Task into its SubTasks: one per model × test case × dimension ×
//! repetition.

use std::collections::{HashMap, HashSet};
use validator::Validate;

use llm_eval_core::{
    Catalog, CoreError, Dimension, DimensionId, Evaluator, Result, SubTask, SubTaskId, SubTaskKey,
    Task, TestCase,
};

/// Builds the SubTasks of `task` that do not exist yet.
///
/// `existing` holds the task's SubTasks already persisted; their ids are
/// reused when wiring dependencies, so expanding twice yields nothing new.
pub async fn expand_task(
    task: &Task,
    catalog: &dyn Catalog,
    existing: &[SubTask],
) -> Result<Vec<SubTask>> {
    task.config.validate()?;
    let config = &task.config;

    for model_id in &config.models {
        if catalog.get_model(model_id).await?.is_none() {
            return Err(CoreError::Validation(format!("unknown model {}", model_id)));
        }
    }

    let mut test_cases: Vec<TestCase> = Vec::with_capacity(config.test_cases.len());
    for id in &config.test_cases {
        let test_case = catalog
            .get_test_case(id)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("unknown test case {}", id)))?;
        test_cases.push(test_case);
    }

    let mut dimensions: Vec<(Dimension, Evaluator)> = Vec::with_capacity(config.dimensions.len());
    for id in &config.dimensions {
        let dimension = catalog
            .get_dimension(id)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("unknown dimension {}", id)))?;
        let evaluator = catalog
            .get_evaluator(&dimension.evaluator_id)
            .await?
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "dimension {} references unknown evaluator {}",
                    dimension.name, dimension.evaluator_id
                ))
            })?;
        dimensions.push((dimension, evaluator));
    }

    let in_scope: HashSet<DimensionId> = config.dimensions.iter().copied().collect();
    let dependencies: HashMap<DimensionId, Vec<DimensionId>> = dimensions
        .iter()
        .map(|(d, _)| {
            let deps = d
                .depends_on
                .iter()
                .copied()
                .filter(|dep| in_scope.contains(dep))
                .collect();
            (d.id, deps)
        })
        .collect();
    check_acyclic(&dependencies)?;

    let mut ids: HashMap<SubTaskKey, SubTaskId> =
        existing.iter().map(|s| (s.key(), s.id)).collect();
    let mut keys = Vec::with_capacity(config.expected_subtasks());
    for model_id in &config.models {
        for test_case in &test_cases {
            for (dimension, _) in &dimensions {
                for repetition_index in 0..config.run_count {
                    let key = SubTaskKey {
                        task_id: task.id,
                        model_id: *model_id,
                        dimension_id: dimension.id,
                        test_case_id: test_case.id,
                        repetition_index,
                    };
                    ids.entry(key).or_insert_with(SubTaskId::new);
                    keys.push(key);
                }
            }
        }
    }

    let test_case_by_id: HashMap<_, _> = test_cases.iter().map(|t| (t.id, t)).collect();
    let dimension_by_id: HashMap<_, _> = dimensions.iter().map(|(d, e)| (d.id, (d, e))).collect();
    let existing_ids: HashSet<SubTaskId> = existing.iter().map(|s| s.id).collect();

    let mut created = Vec::new();
    for key in keys {
        let id = ids[&key];
        if existing_ids.contains(&id) {
            continue;
        }
        let test_case = test_case_by_id[&key.test_case_id];
        let (dimension, evaluator) = dimension_by_id[&key.dimension_id];

        let depends_on: Vec<SubTaskId> = dependencies[&key.dimension_id]
            .iter()
            .map(|dep| {
                ids[&SubTaskKey {
                    dimension_id: *dep,
                    ..key
                }]
            })
            .collect();

        let mut subtask = SubTask::new(key, evaluator.id, evaluator.evaluator_type(), test_case.max_score)
            .with_priority(dimension.priority)
            .with_dependencies(depends_on);
        subtask.id = id;
        created.push(subtask);
    }

    tracing::debug!(
        task_id = %task.id,
        existing = existing.len(),
        created = created.len(),
        "Task expanded"
    );
    Ok(created)
}

fn check_acyclic(dependencies: &HashMap<DimensionId, Vec<DimensionId>>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: DimensionId,
        dependencies: &HashMap<DimensionId, Vec<DimensionId>>,
        marks: &mut HashMap<DimensionId, Mark>,
    ) -> Result<()> {
        match marks.get(&node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(CoreError::Validation(format!(
                    "dimension dependency cycle through {}",
                    node
                )))
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        for dep in dependencies.get(&node).into_iter().flatten() {
            visit(*dep, dependencies, marks)?;
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for node in dependencies.keys() {
        visit(*node, dependencies, &mut marks)?;
    }
    Ok(())
}
