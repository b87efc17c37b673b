//! Durable-queue backend: a dispatcher claims SubTasks and enqueues them;
//! a pool of workers consumes, executes and acknowledges.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llm_eval_core::{
    CoreError, Job, JobQueue, NackOutcome, Result, SubTask, SubTaskId, SubTaskStatus, Task,
    TaskId, TaskProgress,
};

use super::{Processor, ProcessorCore, ProcessorStatsSnapshot, ProcessSubTaskOutcome, ProcessTaskOutcome};

struct Workers {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct QueueProcessor {
    core: Arc<ProcessorCore>,
    queue: Arc<dyn JobQueue>,
    running: Mutex<Option<Workers>>,
}

impl QueueProcessor {
    pub fn new(core: Arc<ProcessorCore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            core,
            queue,
            running: Mutex::new(None),
        }
    }

    /// Claims executable SubTasks and enqueues one job per SubTask. Returns
    /// the number enqueued.
    pub async fn dispatch_once(&self) -> Result<usize> {
        dispatch_to_queue(&self.core, self.queue.as_ref()).await
    }

    /// Consumes and handles at most one job. Returns whether a job was
    /// handled.
    pub async fn work_once(&self) -> Result<bool> {
        let wait = self.core.config().consume_wait();
        match self.queue.consume(wait).await? {
            Some(job) => {
                handle_job(&self.core, self.queue.as_ref(), job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

async fn dispatch_to_queue(core: &ProcessorCore, queue: &dyn JobQueue) -> Result<usize> {
    let claimed = core.dispatch().await?;
    let mut enqueued = 0;
    for subtask in claimed {
        match queue.enqueue(Job::new(subtask.task_id, subtask.id)).await {
            Ok(()) => enqueued += 1,
            Err(e) => {
                warn!(subtask_id = %subtask.id, error = %e, "Enqueue failed; returning SubTask to pending");
                release(core, subtask).await?;
            }
        }
    }
    Ok(enqueued)
}

async fn release(core: &ProcessorCore, mut subtask: SubTask) -> Result<()> {
    subtask.reset_to_pending("could not be enqueued");
    core.store()
        .update_subtask_if(&subtask, SubTaskStatus::Running)
        .await?;
    Ok(())
}

async fn handle_job(core: &ProcessorCore, queue: &dyn JobQueue, job: Job) -> Result<()> {
    match core.process_subtask(&job.subtask_id).await {
        Ok(outcome) => {
            if !outcome.success {
                debug!(job_id = %job.id, error = ?outcome.error, "Job finished without success");
            }
            queue.ack(&job.id).await
        }
        Err(e) if e.is_infrastructure() => {
            let outcome = queue.nack(&job.id, &e.to_string()).await?;
            if outcome == NackOutcome::DeadLettered {
                warn!(
                    job_id = %job.id,
                    subtask_id = %job.subtask_id,
                    deliveries = job.deliveries,
                    error = %e,
                    "Job dead-lettered"
                );
            }
            Ok(())
        }
        Err(e) => {
            warn!(job_id = %job.id, subtask_id = %job.subtask_id, error = %e, "Dropping unprocessable job");
            queue.ack(&job.id).await
        }
    }
}

async fn dispatcher_loop(core: Arc<ProcessorCore>, queue: Arc<dyn JobQueue>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(core.config().poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = dispatch_to_queue(&core, queue.as_ref()).await {
            warn!(error = %e, "Dispatch cycle failed; retrying next tick");
        }
    }
}

async fn worker_loop(
    worker: usize,
    core: Arc<ProcessorCore>,
    queue: Arc<dyn JobQueue>,
    shutdown: CancellationToken,
) {
    let wait = core.config().consume_wait();
    loop {
        let consumed = tokio::select! {
            _ = shutdown.cancelled() => break,
            consumed = queue.consume(wait) => consumed,
        };
        match consumed {
            Ok(Some(job)) => {
                if let Err(e) = handle_job(&core, queue.as_ref(), job).await {
                    warn!(worker, error = %e, "Job acknowledgement failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(worker, error = %e, "Queue consume failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(core.config().poll_interval()) => {}
                }
            }
        }
    }
    debug!(worker, "Queue worker stopped");
}

#[async_trait]
impl Processor for QueueProcessor {
    async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::InvalidState("processor already started".to_string()));
        }

        let shutdown = CancellationToken::new();
        let mut handles = vec![tokio::spawn(dispatcher_loop(
            self.core.clone(),
            self.queue.clone(),
            shutdown.clone(),
        ))];
        let worker_count = self.core.config().worker_count.max(1);
        for worker in 0..worker_count {
            handles.push(tokio::spawn(worker_loop(
                worker,
                self.core.clone(),
                self.queue.clone(),
                shutdown.clone(),
            )));
        }
        *running = Some(Workers { shutdown, handles });
        info!(workers = worker_count, "Queue processor started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(workers) = self.running.lock().await.take() else {
            return Ok(());
        };
        workers.shutdown.cancel();
        for handle in workers.handles {
            handle
                .await
                .map_err(|e| CoreError::Internal(format!("queue worker ended abnormally: {e}")))?;
        }
        info!("Queue processor stopped");
        Ok(())
    }

    async fn process_task(&self, task: &Task) -> Result<ProcessTaskOutcome> {
        self.core.process_task(task).await
    }

    async fn process_subtask(&self, subtask_id: &SubTaskId) -> Result<ProcessSubTaskOutcome> {
        self.core.process_subtask(subtask_id).await
    }

    async fn pause_task(&self, task_id: &TaskId) -> Result<bool> {
        let paused = self.core.pause_task(task_id).await?;
        if paused {
            let purged = self.queue.purge_task(task_id).await?;
            debug!(task_id = %task_id, purged, "Purged queued jobs of paused task");
        }
        Ok(paused)
    }

    async fn resume_task(&self, task_id: &TaskId) -> Result<bool> {
        self.core.resume_task(task_id).await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<bool> {
        let cancelled = self.core.cancel_task(task_id).await?;
        if cancelled {
            let purged = self.queue.purge_task(task_id).await?;
            debug!(task_id = %task_id, purged, "Purged queued jobs of cancelled task");
        }
        Ok(cancelled)
    }

    async fn task_progress(&self, task_id: &TaskId) -> Result<TaskProgress> {
        self.core.task_progress(task_id).await
    }

    async fn health_check(&self) -> bool {
        if let Err(e) = self.queue.pending_len().await {
            warn!(error = %e, "Queue health check failed");
            return false;
        }
        self.core.health_check().await
    }

    fn stats(&self) -> ProcessorStatsSnapshot {
        self.core.stats()
    }

    fn core(&self) -> &Arc<ProcessorCore> {
        &self.core
    }
}
