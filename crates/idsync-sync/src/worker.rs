//! Sync Worker
//!
//! Background worker that claims queued worker tasks from the store and runs
//! them. Handles cooperative cancellation and graceful shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use idsync_core::WorkerTaskId;
use idsync_db::models::{WorkerTask, WorkerTaskStatus};
use idsync_db::SyncStore;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::runner::{task_outcome, RunProfileExecutor};
use crate::scheduler::{ScheduleOrchestrator, TaskOutcome};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of tasks processed concurrently.
    pub concurrency: usize,

    /// How often to poll for queued tasks and cancellation requests (in
    /// milliseconds).
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
        }
    }
}

impl From<&SyncConfig> for WorkerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            poll_interval_ms: config.poll_interval_ms.max(1),
        }
    }
}

type RunningTasks = Arc<Mutex<HashMap<WorkerTaskId, CancellationToken>>>;

/// Worker that processes queued worker tasks.
pub struct SyncWorker {
    store: Arc<dyn SyncStore>,
    executor: Arc<RunProfileExecutor>,
    orchestrator: Arc<ScheduleOrchestrator>,
    config: WorkerConfig,
    running: RunningTasks,
    shutdown: Arc<AtomicBool>,
}

impl SyncWorker {
    /// Create a new worker.
    pub fn new(
        store: Arc<dyn SyncStore>,
        executor: Arc<RunProfileExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(ScheduleOrchestrator::new(store.clone())),
            store,
            executor,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the worker.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting sync worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));

        loop {
            poll_interval.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Worker shutdown requested, stopping poll loop");
                break;
            }
            self.poll_cancellations().await;
            self.poll_and_process(&semaphore).await;
        }

        // Running tasks finish on their own; cancelling them here would
        // leave half-applied runs.
        info!("Waiting for in-flight tasks to complete...");
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("Worker stopped");
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Shared flag for signal handlers.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Claim and run one task on the calling task. Returns the finished task,
    /// or `None` when nothing was queued.
    pub async fn process_next(&self) -> SyncResult<Option<WorkerTask>> {
        let Some(task) = self.store.claim_next_queued_task().await? else {
            return Ok(None);
        };
        let id = task.id;
        process_task(
            self.executor.clone(),
            self.orchestrator.clone(),
            self.running.clone(),
            task,
        )
        .await;
        Ok(self.store.get_worker_task(id).await?)
    }

    /// Claim queued tasks while permits are free.
    async fn poll_and_process(&self, semaphore: &Arc<Semaphore>) {
        loop {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                debug!("All worker slots busy");
                return;
            };

            let task = match self.store.claim_next_queued_task().await {
                Ok(Some(task)) => task,
                Ok(None) => return,
                Err(e) => {
                    error!(error = %e, "Failed to claim worker task");
                    return;
                }
            };

            let executor = self.executor.clone();
            let orchestrator = self.orchestrator.clone();
            let running = self.running.clone();

            tokio::spawn(async move {
                let _permit = permit;
                process_task(executor, orchestrator, running, task).await;
            });
        }
    }

    /// Trigger tokens of owned tasks with a pending cancellation and remove
    /// cancelled tasks that never started.
    pub async fn poll_cancellations(&self) {
        let requested = match self
            .store
            .list_worker_tasks_by_status(WorkerTaskStatus::CancellationRequested)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to list cancellation requests");
                return;
            }
        };

        for task in requested {
            if let Some(token) = self.running.lock().await.get(&task.id) {
                if !token.is_cancelled() {
                    info!(task_id = %task.id, "Cancelling running task");
                    token.cancel();
                }
                continue;
            }
            if task.started_at.is_some() {
                // Owned by another worker.
                continue;
            }

            match self
                .store
                .delete_worker_task_if(task.id, WorkerTaskStatus::CancellationRequested)
                .await
            {
                Ok(true) => {
                    debug!(task_id = %task.id, "Removed cancelled task that never started");
                    if let Some(execution_id) = task.schedule_execution_id {
                        if let Err(e) = self
                            .orchestrator
                            .advance_schedule_execution(execution_id)
                            .await
                        {
                            error!(error = %e, execution_id = %execution_id, "Failed to advance execution");
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => error!(task_id = %task.id, error = %e, "Failed to remove cancelled task"),
            }
        }
    }
}

/// Run a claimed task and record its outcome.
#[instrument(skip(executor, orchestrator, running, task), fields(task_id = %task.id))]
async fn process_task(
    executor: Arc<RunProfileExecutor>,
    orchestrator: Arc<ScheduleOrchestrator>,
    running: RunningTasks,
    task: WorkerTask,
) {
    let token = CancellationToken::new();
    running.lock().await.insert(task.id, token.clone());

    info!(
        connected_system_id = %task.connected_system_id,
        run_profile_id = %task.run_profile_id,
        step_index = task.step_index,
        "Processing task"
    );

    if let Err(e) = orchestrator.mark_task_processing(task.id).await {
        warn!(error = %e, "Failed to mark task processing");
    }

    let outcome = match executor.execute(&task, &token).await {
        Ok(activity) => task_outcome(&activity),
        Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
        Err(e) => {
            error!(error = %e, "Task could not be run");
            TaskOutcome::Failed(e.to_string())
        }
    };

    running.lock().await.remove(&task.id);

    if let Err(e) = orchestrator.complete_task(task.id, outcome).await {
        error!(error = %e, "Failed to complete task");
    }
}
