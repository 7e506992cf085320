//! Schedule execution orchestration.
//!
//! A schedule execution owns one worker task per step. Steps sharing a step
//! index form a group; only the current group is visible to workers. The
//! orchestrator never runs tasks itself, it only moves rows:
//!
//! - start: create the execution and every task in one store call
//! - cancel: cancel the execution and its not-yet-running tasks atomically
//! - advance: release the next group once the current one has finished,
//!   guarded by a compare-and-set on the current step index

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use idsync_core::{ScheduleExecutionId, ScheduleId, WorkerTaskId};
use idsync_db::models::{
    ExecutionMode, Initiator, ScheduleExecution, ScheduleExecutionStatus, ScheduleStep,
    WorkerTask, WorkerTaskStatus,
};
use idsync_db::{ExecutionChangeSet, SyncStore, TaskTransition, TaskTransitionAction};

use crate::error::{SyncError, SyncResult};

/// Error message of a user-cancelled execution.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Guarded writes retried before giving up on a racing update.
const MAX_GUARDED_ATTEMPTS: usize = 3;

/// How a worker task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    /// Stopped after a cancellation request; recorded as a failure.
    Cancelled,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Failed(message) => write!(f, "failed: {message}"),
            TaskOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one advance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The execution is missing or already finished.
    Idle,
    /// The current group still has running tasks.
    Waiting,
    /// Another caller advanced the execution first.
    Superseded,
    /// The group with this step index was released.
    Released(u32),
    Completed,
    Failed,
}

/// Moves schedule executions and their worker tasks through their states.
pub struct ScheduleOrchestrator {
    store: Arc<dyn SyncStore>,
}

impl ScheduleOrchestrator {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    /// Start an execution of a schedule.
    ///
    /// Returns `None` for a schedule without steps. The first step group is
    /// queued, later groups wait for their predecessors.
    #[instrument(skip(self), fields(initiator = %initiator))]
    pub async fn start_schedule_execution(
        &self,
        schedule_id: ScheduleId,
        initiator: Initiator,
    ) -> SyncResult<Option<ScheduleExecution>> {
        let schedule = self
            .store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Schedule", schedule_id))?;
        if !schedule.enabled {
            return Err(SyncError::invalid_state(format!(
                "Schedule '{}' is disabled",
                schedule.name
            )));
        }

        let mut groups: BTreeMap<u32, Vec<&ScheduleStep>> = BTreeMap::new();
        for step in &schedule.steps {
            groups.entry(step.step_index).or_default().push(step);
        }
        let Some(first_index) = groups.keys().next().copied() else {
            info!(schedule = %schedule.name, "Schedule has no steps, nothing to run");
            return Ok(None);
        };

        let execution = ScheduleExecution {
            id: ScheduleExecutionId::new(),
            schedule_id: schedule.id,
            schedule_name: schedule.name.clone(),
            status: ScheduleExecutionStatus::Queued,
            current_step_index: first_index,
            total_steps: schedule.steps.len() as u32,
            initiated_by: initiator,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        };

        let mut tasks = Vec::with_capacity(schedule.steps.len());
        for (index, steps) in &groups {
            let execution_mode = if steps.len() > 1 {
                ExecutionMode::Parallel
            } else {
                ExecutionMode::Sequential
            };
            let status = if *index == first_index {
                WorkerTaskStatus::Queued
            } else {
                WorkerTaskStatus::WaitingForPreviousStep
            };
            for step in steps {
                tasks.push(WorkerTask {
                    schedule_execution_id: Some(execution.id),
                    step_index: *index,
                    status,
                    execution_mode,
                    continue_on_failure: step.continue_on_failure,
                    ..WorkerTask::ad_hoc(step.connected_system_id, step.run_profile_id, initiator)
                });
            }
        }

        let task_count = tasks.len();
        self.store
            .create_schedule_execution(execution.clone(), tasks)
            .await?;

        info!(
            execution_id = %execution.id,
            schedule = %schedule.name,
            tasks = task_count,
            groups = groups.len(),
            "Schedule execution started"
        );
        Ok(Some(execution))
    }

    /// Cancel an execution.
    ///
    /// Returns false, without side effects, when the execution does not
    /// exist or has already finished. Queued tasks become
    /// `CancellationRequested`, waiting tasks are deleted and running tasks
    /// are left to finish.
    #[instrument(skip(self))]
    pub async fn cancel_schedule_execution(&self, id: ScheduleExecutionId) -> SyncResult<bool> {
        for _ in 0..MAX_GUARDED_ATTEMPTS {
            let Some(execution) = self.store.get_schedule_execution(id).await? else {
                return Ok(false);
            };
            if execution.status.is_terminal() {
                debug!(status = %execution.status, "Execution already finished");
                return Ok(false);
            }

            let tasks = self.store.list_worker_tasks(id).await?;
            let task_transitions: Vec<TaskTransition> = tasks
                .iter()
                .filter_map(|task| match task.status {
                    WorkerTaskStatus::Queued => Some(TaskTransition {
                        task_id: task.id,
                        expected_status: WorkerTaskStatus::Queued,
                        action: TaskTransitionAction::SetStatus(
                            WorkerTaskStatus::CancellationRequested,
                        ),
                    }),
                    WorkerTaskStatus::WaitingForPreviousStep => Some(TaskTransition {
                        task_id: task.id,
                        expected_status: WorkerTaskStatus::WaitingForPreviousStep,
                        action: TaskTransitionAction::Delete,
                    }),
                    _ => None,
                })
                .collect();

            let mut cancelled = execution.clone();
            cancelled.status = ScheduleExecutionStatus::Cancelled;
            cancelled.completed_at = Some(Utc::now());
            cancelled.error_message = Some(CANCELLED_BY_USER.to_string());

            let applied = self
                .store
                .apply_execution_changes(ExecutionChangeSet {
                    execution: cancelled,
                    expected_statuses: vec![execution.status],
                    expected_step_index: execution.current_step_index,
                    task_transitions,
                })
                .await?;
            if applied.applied {
                info!(
                    execution_id = %id,
                    tasks_affected = applied.transitioned.len(),
                    "Schedule execution cancelled"
                );
                return Ok(true);
            }
            debug!(execution_id = %id, "Execution changed during cancel, retrying");
        }
        Err(SyncError::invalid_state(format!(
            "Execution {id} kept changing while being cancelled"
        )))
    }

    /// Ask for one task to stop. Running tasks are stopped cooperatively by
    /// their worker.
    #[instrument(skip(self))]
    pub async fn request_task_cancellation(&self, task_id: WorkerTaskId) -> SyncResult<bool> {
        for _ in 0..MAX_GUARDED_ATTEMPTS {
            let Some(task) = self.store.get_worker_task(task_id).await? else {
                return Ok(false);
            };
            if !task
                .status
                .can_transition_to(WorkerTaskStatus::CancellationRequested)
            {
                return Ok(false);
            }

            let expected = task.status;
            let requested = WorkerTask {
                status: WorkerTaskStatus::CancellationRequested,
                ..task
            };
            if self.store.update_worker_task_if(requested, expected).await? {
                info!(task_id = %task_id, from = %expected, "Task cancellation requested");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Record that a worker started a task and move its execution to
    /// `InProgress` if it is still queued.
    pub async fn mark_task_processing(&self, task_id: WorkerTaskId) -> SyncResult<bool> {
        let task = self
            .store
            .get_worker_task(task_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Worker task", task_id))?;

        let task = match task.status {
            WorkerTaskStatus::Processing => task,
            WorkerTaskStatus::Queued => {
                let processing = WorkerTask {
                    status: WorkerTaskStatus::Processing,
                    started_at: Some(Utc::now()),
                    ..task
                };
                if !self
                    .store
                    .update_worker_task_if(processing.clone(), WorkerTaskStatus::Queued)
                    .await?
                {
                    return Ok(false);
                }
                processing
            }
            _ => return Ok(false),
        };

        if let Some(execution_id) = task.schedule_execution_id {
            if let Some(execution) = self.store.get_schedule_execution(execution_id).await? {
                if execution.status == ScheduleExecutionStatus::Queued {
                    let expected_step_index = execution.current_step_index;
                    let started = ScheduleExecution {
                        status: ScheduleExecutionStatus::InProgress,
                        started_at: Some(Utc::now()),
                        ..execution
                    };
                    let applied = self
                        .store
                        .apply_execution_changes(ExecutionChangeSet {
                            execution: started,
                            expected_statuses: vec![ScheduleExecutionStatus::Queued],
                            expected_step_index,
                            task_transitions: Vec::new(),
                        })
                        .await?;
                    if applied.applied {
                        info!(execution_id = %execution_id, "Schedule execution in progress");
                    }
                }
            }
        }
        Ok(true)
    }

    /// Finish a task and advance its execution.
    #[instrument(skip(self), fields(outcome = %outcome))]
    pub async fn complete_task(
        &self,
        task_id: WorkerTaskId,
        outcome: TaskOutcome,
    ) -> SyncResult<Option<WorkerTask>> {
        let mut finished = None;
        for _ in 0..MAX_GUARDED_ATTEMPTS {
            let Some(task) = self.store.get_worker_task(task_id).await? else {
                return Ok(None);
            };
            if !matches!(
                task.status,
                WorkerTaskStatus::Processing | WorkerTaskStatus::CancellationRequested
            ) {
                warn!(status = %task.status, "Task is not running, ignoring completion");
                return Ok(None);
            }

            let expected = task.status;
            let (status, error_message) = match &outcome {
                TaskOutcome::Completed => (WorkerTaskStatus::Completed, None),
                TaskOutcome::Failed(message) => (WorkerTaskStatus::Failed, Some(message.clone())),
                TaskOutcome::Cancelled => {
                    (WorkerTaskStatus::Failed, Some("Cancelled".to_string()))
                }
            };
            let done = WorkerTask {
                status,
                error_message,
                completed_at: Some(Utc::now()),
                ..task
            };
            if self.store.update_worker_task_if(done.clone(), expected).await? {
                finished = Some(done);
                break;
            }
        }

        let Some(task) = finished else {
            return Err(SyncError::invalid_state(format!(
                "Task {task_id} kept changing while being completed"
            )));
        };
        debug!(task_id = %task.id, status = %task.status, "Task finished");

        if let Some(execution_id) = task.schedule_execution_id {
            self.advance_schedule_execution(execution_id).await?;
        }
        Ok(Some(task))
    }

    /// Advance an execution whose current group may have finished.
    ///
    /// Safe to call concurrently: the update is guarded by the current step
    /// index, so a group is released once.
    #[instrument(skip(self))]
    pub async fn advance_schedule_execution(
        &self,
        id: ScheduleExecutionId,
    ) -> SyncResult<AdvanceOutcome> {
        let Some(execution) = self.store.get_schedule_execution(id).await? else {
            return Ok(AdvanceOutcome::Idle);
        };
        if execution.status.is_terminal() {
            return Ok(AdvanceOutcome::Idle);
        }

        let tasks = self.store.list_worker_tasks(id).await?;
        let current_index = execution.current_step_index;
        let current: Vec<&WorkerTask> = tasks
            .iter()
            .filter(|t| t.step_index == current_index)
            .collect();
        if current.iter().any(|t| !t.status.is_terminal()) {
            return Ok(AdvanceOutcome::Waiting);
        }

        let blocking_failure = current
            .iter()
            .find(|t| t.status == WorkerTaskStatus::Failed && !t.continue_on_failure);
        let next_index = tasks
            .iter()
            .map(|t| t.step_index)
            .filter(|index| *index > current_index)
            .min();

        let mut next = execution.clone();
        let mut task_transitions = Vec::new();
        let outcome = if let Some(failed) = blocking_failure {
            next.status = ScheduleExecutionStatus::Failed;
            next.completed_at = Some(Utc::now());
            next.error_message = Some(format!(
                "Step {} failed: {}",
                current_index,
                failed.error_message.as_deref().unwrap_or("unknown error")
            ));
            for task in tasks.iter().filter(|t| t.step_index > current_index) {
                if matches!(
                    task.status,
                    WorkerTaskStatus::WaitingForPreviousStep
                        | WorkerTaskStatus::CancellationRequested
                ) && task.started_at.is_none()
                {
                    task_transitions.push(TaskTransition {
                        task_id: task.id,
                        expected_status: task.status,
                        action: TaskTransitionAction::Delete,
                    });
                }
            }
            AdvanceOutcome::Failed
        } else if let Some(next_index) = next_index {
            next.status = ScheduleExecutionStatus::InProgress;
            next.current_step_index = next_index;
            for task in tasks.iter().filter(|t| {
                t.step_index == next_index && t.status == WorkerTaskStatus::WaitingForPreviousStep
            }) {
                task_transitions.push(TaskTransition {
                    task_id: task.id,
                    expected_status: WorkerTaskStatus::WaitingForPreviousStep,
                    action: TaskTransitionAction::SetStatus(WorkerTaskStatus::Queued),
                });
            }
            AdvanceOutcome::Released(next_index)
        } else {
            next.status = ScheduleExecutionStatus::Completed;
            next.completed_at = Some(Utc::now());
            AdvanceOutcome::Completed
        };

        let applied = self
            .store
            .apply_execution_changes(ExecutionChangeSet {
                execution: next,
                expected_statuses: vec![
                    ScheduleExecutionStatus::Queued,
                    ScheduleExecutionStatus::InProgress,
                ],
                expected_step_index: current_index,
                task_transitions,
            })
            .await?;
        if !applied.applied {
            debug!(execution_id = %id, "Execution already advanced");
            return Ok(AdvanceOutcome::Superseded);
        }

        match outcome {
            AdvanceOutcome::Released(index) => info!(
                execution_id = %id,
                step_index = index,
                tasks = applied.transitioned.len(),
                "Released next step group"
            ),
            AdvanceOutcome::Failed => warn!(
                execution_id = %id,
                step_index = current_index,
                removed_tasks = applied.transitioned.len(),
                "Schedule execution failed"
            ),
            _ => info!(execution_id = %id, "Schedule execution completed"),
        }
        Ok(outcome)
    }
}
