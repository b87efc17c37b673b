//! In-process polling backend: a timer re-queries the store each tick and
//! runs the claimed SubTasks on the local runtime.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use llm_eval_core::{CoreError, Result, SubTaskId, Task, TaskId, TaskProgress};

use super::{Processor, ProcessorCore, ProcessorStatsSnapshot, ProcessSubTaskOutcome, ProcessTaskOutcome};

struct PollLoop {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PollingProcessor {
    core: Arc<ProcessorCore>,
    running: Mutex<Option<PollLoop>>,
}

impl PollingProcessor {
    pub fn new(core: Arc<ProcessorCore>) -> Self {
        Self {
            core,
            running: Mutex::new(None),
        }
    }

    /// Runs a single dispatch cycle and waits for every SubTask it claimed.
    /// Returns the number of SubTasks executed.
    pub async fn run_once(&self) -> Result<usize> {
        let claimed = self.core.dispatch().await?;
        let count = claimed.len();
        let mut in_flight = JoinSet::new();
        for subtask in claimed {
            in_flight.spawn(execute_claimed(self.core.clone(), subtask.id));
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "SubTask execution panicked");
            }
        }
        Ok(count)
    }
}

async fn execute_claimed(core: Arc<ProcessorCore>, subtask_id: SubTaskId) {
    match core.process_subtask(&subtask_id).await {
        Ok(outcome) if !outcome.success => {
            debug!(subtask_id = %subtask_id, error = ?outcome.error, "SubTask did not succeed");
        }
        Ok(_) => {}
        // Left running; the zombie sweep will return it to the pool.
        Err(e) => warn!(subtask_id = %subtask_id, error = %e, "SubTask execution aborted"),
    }
}

async fn poll_loop(core: Arc<ProcessorCore>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(core.config().poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "SubTask execution panicked");
            }
        }

        match core.dispatch().await {
            Ok(claimed) => {
                for subtask in claimed {
                    in_flight.spawn(execute_claimed(core.clone(), subtask.id));
                }
            }
            Err(e) => warn!(error = %e, "Dispatch cycle failed; retrying next tick"),
        }
    }

    let draining = in_flight.len();
    if draining > 0 {
        info!(in_flight = draining, "Waiting for in-flight SubTasks");
    }
    while in_flight.join_next().await.is_some() {}
}

#[async_trait]
impl Processor for PollingProcessor {
    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::InvalidState("processor already started".to_string()));
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(self.core.clone(), shutdown.clone()));
        *running = Some(PollLoop { shutdown, handle });
        info!(
            poll_interval_ms = self.core.config().poll_interval_ms,
            global_limit = self.core.config().global_concurrency_limit,
            "Polling processor started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(poll) = self.running.lock().await.take() else {
            return Ok(());
        };
        poll.shutdown.cancel();
        poll.handle
            .await
            .map_err(|e| CoreError::Internal(format!("poll loop ended abnormally: {e}")))?;
        info!("Polling processor stopped");
        Ok(())
    }

    async fn process_task(&self, task: &Task) -> Result<ProcessTaskOutcome> {
        self.core.process_task(task).await
    }

    async fn process_subtask(&self, subtask_id: &SubTaskId) -> Result<ProcessSubTaskOutcome> {
        self.core.process_subtask(subtask_id).await
    }

    async fn pause_task(&self, task_id: &TaskId) -> Result<bool> {
        self.core.pause_task(task_id).await
    }

    async fn resume_task(&self, task_id: &TaskId) -> Result<bool> {
        self.core.resume_task(task_id).await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<bool> {
        self.core.cancel_task(task_id).await
    }

    async fn task_progress(&self, task_id: &TaskId) -> Result<TaskProgress> {
        self.core.task_progress(task_id).await
    }

    async fn health_check(&self) -> bool {
        self.core.health_check().await
    }

    fn stats(&self) -> ProcessorStatsSnapshot {
        self.core.stats()
    }

    fn core(&self) -> &Arc<ProcessorCore> {
        &self.core
    }
}
