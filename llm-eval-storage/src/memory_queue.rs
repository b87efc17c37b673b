//! Process-local [`JobQueue`] with leases, redelivery and dead-lettering.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use llm_eval_core::{Job, JobId, JobQueue, NackOutcome, Result, TaskId};

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// How long a consumed job stays invisible before it is redelivered.
    pub lease: Duration,
    /// Deliveries after which a nacked job is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            max_deliveries: 3,
        }
    }
}

#[derive(Debug)]
struct Entry {
    job: Job,
    visible_at: Instant,
    last_error: Option<String>,
}

#[derive(Default)]
struct QueueState {
    ready: Vec<Entry>,
    /// Oldest first; bounded by `dead_capacity`.
    dead: VecDeque<(Job, String)>,
}

pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    settings: QueueSettings,
    dead_capacity: usize,
}

impl InMemoryJobQueue {
    const POLL_SLICE: Duration = Duration::from_millis(25);
    const DEFAULT_DEAD_CAPACITY: usize = 1024;

    pub fn new(settings: QueueSettings) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            settings,
            dead_capacity: Self::DEFAULT_DEAD_CAPACITY,
        }
    }

    /// Keeps at most `capacity` dead letters; the oldest are dropped first.
    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_capacity = capacity.max(1);
        self
    }

    pub async fn dead_letters(&self) -> Vec<(Job, String)> {
        self.state.lock().await.dead.iter().cloned().collect()
    }

    /// Removes and returns every dead letter.
    pub async fn drain_dead_letters(&self) -> Vec<(Job, String)> {
        self.state.lock().await.dead.drain(..).collect()
    }

    async fn try_lease(&self) -> Option<Job> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let entry = state
            .ready
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| e.job.enqueued_at)?;
        entry.job.deliveries += 1;
        entry.visible_at = now + self.settings.lease;
        Some(entry.job.clone())
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        self.state.lock().await.ready.push(Entry {
            job,
            visible_at: Instant::now(),
            last_error: None,
        });
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, wait: Duration) -> Result<Option<Job>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(job) = self.try_lease().await {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let slice = (deadline - now).min(Self::POLL_SLICE);
            let _ = tokio::time::timeout(slice, self.notify.notified()).await;
        }
    }

    async fn ack(&self, job_id: &JobId) -> Result<()> {
        self.state.lock().await.ready.retain(|e| &e.job.id != job_id);
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, error: &str) -> Result<NackOutcome> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.ready.iter().position(|e| &e.job.id == job_id) else {
            return Ok(NackOutcome::DeadLettered);
        };

        if state.ready[pos].job.deliveries >= self.settings.max_deliveries {
            let entry = state.ready.remove(pos);
            tracing::warn!(
                job_id = %entry.job.id,
                subtask_id = %entry.job.subtask_id,
                deliveries = entry.job.deliveries,
                "Job dead-lettered"
            );
            if state.dead.len() >= self.dead_capacity {
                if let Some((dropped, _)) = state.dead.pop_front() {
                    tracing::warn!(job_id = %dropped.id, "Dead-letter buffer full; oldest entry dropped");
                }
            }
            state.dead.push_back((entry.job, error.to_string()));
            return Ok(NackOutcome::DeadLettered);
        }

        let entry = &mut state.ready[pos];
        entry.visible_at = Instant::now();
        entry.last_error = Some(error.to_string());
        drop(state);
        self.notify.notify_one();
        Ok(NackOutcome::Requeued)
    }

    async fn purge_task(&self, task_id: &TaskId) -> Result<usize> {
        let mut state = self.state.lock().await;
        let before = state.ready.len();
        state.ready.retain(|e| &e.job.task_id != task_id);
        Ok(before - state.ready.len())
    }

    async fn pending_len(&self) -> Result<usize> {
        Ok(self.state.lock().await.ready.len())
    }
}
