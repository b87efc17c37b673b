use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Timer-driven loop that re-queries the store.
    #[default]
    Polling,
    /// Dispatcher feeding a durable job queue drained by a worker pool.
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorConfig {
    pub backend: BackendKind,
    pub poll_interval_ms: u64,
    /// Upper bound on running SubTasks across all tasks.
    pub global_concurrency_limit: usize,
    /// A running SubTask not updated for this long is reset to pending.
    /// Must exceed the longest inference plus evaluation time.
    pub zombie_timeout_secs: u64,
    /// Queue backend only.
    pub worker_count: usize,
    /// Queue backend only.
    pub max_deliveries: u32,
    /// Queue backend only: how long a consumer blocks waiting for a job.
    pub consume_wait_ms: u64,
    /// Queue backend only: visibility timeout of a consumed job.
    pub lease_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Polling,
            poll_interval_ms: 1_000,
            global_concurrency_limit: 32,
            zombie_timeout_secs: 600,
            worker_count: 4,
            max_deliveries: 3,
            consume_wait_ms: 1_000,
            lease_secs: 900,
        }
    }
}

impl ProcessorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn zombie_timeout(&self) -> Duration {
        Duration::from_secs(self.zombie_timeout_secs)
    }

    pub fn consume_wait(&self) -> Duration {
        Duration::from_millis(self.consume_wait_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}
