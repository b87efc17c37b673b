//! Process-local [`TaskStore`]. Conditional updates are evaluated under the
//! write lock, so concurrent workers in one process see the same guarantees
//! as against Postgres.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use llm_eval_core::{
    CoreError, ExecutionRecord, Result, SubTask, SubTaskFilter, SubTaskId, SubTaskKey,
    SubTaskStatus, Task, TaskId, TaskStatus, TaskStore,
};

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, Task>,
    subtasks: HashMap<SubTaskId, SubTask>,
    keys: HashMap<SubTaskKey, SubTaskId>,
    records: Vec<ExecutionRecord>,
}

pub struct InMemoryStore {
    state: RwLock<State>,
    available: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: every call fails with `Unavailable` until
    /// re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::Unavailable("in-memory store disabled".to_string()))
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.check()?;
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(CoreError::Conflict(format!("task {} already exists", task.id)));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        self.check()?;
        Ok(self.state.read().await.tasks.get(id).cloned())
    }

    async fn list_tasks(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        self.check()?;
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| statuses.is_empty() || statuses.contains(&t.status))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn update_task_if(&self, task: &Task, expected: TaskStatus) -> Result<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| CoreError::NotFound(format!("task {}", task.id)))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = task.clone();
        Ok(true)
    }

    async fn insert_subtasks(&self, subtasks: &[SubTask]) -> Result<usize> {
        self.check()?;
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for subtask in subtasks {
            let key = subtask.key();
            if state.keys.contains_key(&key) || state.subtasks.contains_key(&subtask.id) {
                continue;
            }
            state.keys.insert(key, subtask.id);
            state.subtasks.insert(subtask.id, subtask.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_subtask(&self, id: &SubTaskId) -> Result<Option<SubTask>> {
        self.check()?;
        Ok(self.state.read().await.subtasks.get(id).cloned())
    }

    async fn list_subtasks(&self, filter: &SubTaskFilter) -> Result<Vec<SubTask>> {
        self.check()?;
        let state = self.state.read().await;
        let mut subtasks: Vec<SubTask> = state
            .subtasks
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        subtasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(subtasks)
    }

    async fn count_subtasks(&self, filter: &SubTaskFilter) -> Result<usize> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.subtasks.values().filter(|s| filter.matches(s)).count())
    }

    async fn update_subtask_if(&self, subtask: &SubTask, expected: SubTaskStatus) -> Result<bool> {
        self.check()?;
        let mut state = self.state.write().await;
        let stored = state
            .subtasks
            .get_mut(&subtask.id)
            .ok_or_else(|| CoreError::NotFound(format!("subtask {}", subtask.id)))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = subtask.clone();
        Ok(true)
    }

    async fn insert_execution_record(&self, record: &ExecutionRecord) -> Result<()> {
        self.check()?;
        self.state.write().await.records.push(record.clone());
        Ok(())
    }

    async fn list_execution_records(&self, subtask_id: &SubTaskId) -> Result<Vec<ExecutionRecord>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .await
            .records
            .iter()
            .filter(|r| &r.subtask_id == subtask_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
