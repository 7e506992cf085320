//! Memory Store Contract Tests
//!
//! Guarded writes the scheduler and worker rely on:
//! - Execution change sets apply atomically or not at all
//! - Per-task guards inside an applied change set
//! - Claim order of queued tasks

use chrono::{Duration, Utc};

use idsync_core::{ConnectedSystemId, RunProfileId, ScheduleExecutionId, ScheduleId};
use idsync_db::models::{
    Initiator, ScheduleExecution, ScheduleExecutionStatus, WorkerTask, WorkerTaskStatus,
};
use idsync_db::{
    ExecutionChangeSet, MemoryStore, ScheduleRepository, TaskTransition, TaskTransitionAction,
    WorkerTaskRepository,
};

// =============================================================================
// Helpers
// =============================================================================

fn execution() -> ScheduleExecution {
    ScheduleExecution {
        id: ScheduleExecutionId::new(),
        schedule_id: ScheduleId::new(),
        schedule_name: "nightly".to_string(),
        status: ScheduleExecutionStatus::InProgress,
        current_step_index: 0,
        total_steps: 2,
        initiated_by: Initiator::System,
        queued_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: None,
        error_message: None,
    }
}

fn task(execution: &ScheduleExecution, step: u32, status: WorkerTaskStatus) -> WorkerTask {
    WorkerTask {
        schedule_execution_id: Some(execution.id),
        step_index: step,
        status,
        ..WorkerTask::ad_hoc(ConnectedSystemId::new(), RunProfileId::new(), Initiator::System)
    }
}

// =============================================================================
// Execution change sets
// =============================================================================

#[tokio::test]
async fn test_stale_step_index_applies_nothing() {
    let store = MemoryStore::new();
    let exec = execution();
    let waiting = task(&exec, 1, WorkerTaskStatus::WaitingForPreviousStep);
    store
        .create_schedule_execution(exec.clone(), vec![waiting.clone()])
        .await
        .unwrap();

    let result = store
        .apply_execution_changes(ExecutionChangeSet {
            execution: ScheduleExecution {
                current_step_index: 1,
                ..exec.clone()
            },
            expected_statuses: vec![ScheduleExecutionStatus::InProgress],
            expected_step_index: 5,
            task_transitions: vec![TaskTransition {
                task_id: waiting.id,
                expected_status: WorkerTaskStatus::WaitingForPreviousStep,
                action: TaskTransitionAction::SetStatus(WorkerTaskStatus::Queued),
            }],
        })
        .await
        .unwrap();

    assert!(!result.applied);
    let stored = store.get_worker_task(waiting.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkerTaskStatus::WaitingForPreviousStep);
    let stored = store.get_schedule_execution(exec.id).await.unwrap().unwrap();
    assert_eq!(stored.current_step_index, 0);
}

#[tokio::test]
async fn test_task_guards_skip_changed_tasks() {
    let store = MemoryStore::new();
    let exec = execution();
    let queued = task(&exec, 0, WorkerTaskStatus::Queued);
    let running = task(&exec, 0, WorkerTaskStatus::Processing);
    let waiting = task(&exec, 1, WorkerTaskStatus::WaitingForPreviousStep);
    store
        .create_schedule_execution(
            exec.clone(),
            vec![queued.clone(), running.clone(), waiting.clone()],
        )
        .await
        .unwrap();

    let result = store
        .apply_execution_changes(ExecutionChangeSet {
            execution: ScheduleExecution {
                status: ScheduleExecutionStatus::Cancelled,
                ..exec.clone()
            },
            expected_statuses: vec![
                ScheduleExecutionStatus::Queued,
                ScheduleExecutionStatus::InProgress,
            ],
            expected_step_index: 0,
            task_transitions: vec![
                TaskTransition {
                    task_id: queued.id,
                    expected_status: WorkerTaskStatus::Queued,
                    action: TaskTransitionAction::SetStatus(
                        WorkerTaskStatus::CancellationRequested,
                    ),
                },
                TaskTransition {
                    task_id: running.id,
                    expected_status: WorkerTaskStatus::Queued,
                    action: TaskTransitionAction::SetStatus(
                        WorkerTaskStatus::CancellationRequested,
                    ),
                },
                TaskTransition {
                    task_id: waiting.id,
                    expected_status: WorkerTaskStatus::WaitingForPreviousStep,
                    action: TaskTransitionAction::Delete,
                },
            ],
        })
        .await
        .unwrap();

    assert!(result.applied);
    assert_eq!(result.transitioned, vec![queued.id, waiting.id]);

    let tasks = store.list_worker_tasks(exec.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    let running = store.get_worker_task(running.id).await.unwrap().unwrap();
    assert_eq!(running.status, WorkerTaskStatus::Processing);
    let execution = store.get_schedule_execution(exec.id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::Cancelled);
}

// =============================================================================
// Worker tasks
// =============================================================================

#[tokio::test]
async fn test_claim_takes_oldest_queued_task() {
    let store = MemoryStore::new();
    let exec = execution();
    let now = Utc::now();
    let newer = WorkerTask {
        created_at: now,
        ..task(&exec, 0, WorkerTaskStatus::Queued)
    };
    let older = WorkerTask {
        created_at: now - Duration::seconds(5),
        ..task(&exec, 0, WorkerTaskStatus::Queued)
    };
    let waiting = WorkerTask {
        created_at: now - Duration::seconds(10),
        ..task(&exec, 1, WorkerTaskStatus::WaitingForPreviousStep)
    };
    for t in [&newer, &older, &waiting] {
        store.create_worker_task(t.clone()).await.unwrap();
    }

    let first = store.claim_next_queued_task().await.unwrap().unwrap();
    let second = store.claim_next_queued_task().await.unwrap().unwrap();

    assert_eq!(first.id, older.id);
    assert_eq!(second.id, newer.id);
    assert!(store.claim_next_queued_task().await.unwrap().is_none());
}

#[tokio::test]
async fn test_guarded_task_update_and_delete() {
    let store = MemoryStore::new();
    let exec = execution();
    let t = task(&exec, 0, WorkerTaskStatus::Queued);
    store.create_worker_task(t.clone()).await.unwrap();

    let done = WorkerTask {
        status: WorkerTaskStatus::Completed,
        ..t.clone()
    };
    assert!(!store
        .update_worker_task_if(done.clone(), WorkerTaskStatus::Processing)
        .await
        .unwrap());
    assert!(store
        .update_worker_task_if(done, WorkerTaskStatus::Queued)
        .await
        .unwrap());

    assert!(!store
        .delete_worker_task_if(t.id, WorkerTaskStatus::Queued)
        .await
        .unwrap());
    assert!(store
        .delete_worker_task_if(t.id, WorkerTaskStatus::Completed)
        .await
        .unwrap());
    assert!(store.get_worker_task(t.id).await.unwrap().is_none());
}
