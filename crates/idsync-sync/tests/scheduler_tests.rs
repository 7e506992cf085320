//! Schedule Orchestrator Tests
//!
//! Covers the schedule execution lifecycle against the memory store:
//! - Task creation and step grouping on start
//! - Cancellation of executions and single tasks
//! - Advancing step groups, failure handling and completion

use std::sync::Arc;

use idsync_core::{ConnectedSystemId, RunProfileId, ScheduleExecutionId};
use idsync_db::models::{
    ExecutionMode, Initiator, Schedule, ScheduleExecutionStatus, ScheduleStep, WorkerTask,
    WorkerTaskStatus,
};
use idsync_db::{MemoryStore, ScheduleRepository, WorkerTaskRepository};
use idsync_sync::scheduler::CANCELLED_BY_USER;
use idsync_sync::{AdvanceOutcome, ScheduleOrchestrator, SyncError, TaskOutcome};

// =============================================================================
// Helpers
// =============================================================================

fn step(index: u32) -> ScheduleStep {
    ScheduleStep::new(index, ConnectedSystemId::new(), RunProfileId::new())
}

async fn setup(schedule: Schedule) -> (Arc<MemoryStore>, ScheduleOrchestrator, Schedule) {
    let store = Arc::new(MemoryStore::new());
    store.save_schedule(schedule.clone()).await.unwrap();
    let orchestrator = ScheduleOrchestrator::new(store.clone());
    (store, orchestrator, schedule)
}

async fn start(orchestrator: &ScheduleOrchestrator, schedule: &Schedule) -> ScheduleExecutionId {
    orchestrator
        .start_schedule_execution(schedule.id, Initiator::System)
        .await
        .unwrap()
        .expect("schedule has steps")
        .id
}

async fn tasks_at(store: &MemoryStore, id: ScheduleExecutionId, index: u32) -> Vec<WorkerTask> {
    store
        .list_worker_tasks(id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.step_index == index)
        .collect()
}

// =============================================================================
// Start
// =============================================================================

#[tokio::test]
async fn test_parallel_first_group_and_waiting_later_groups() {
    let schedule = Schedule::new("nightly")
        .with_step(step(0))
        .with_step(step(0).continue_on_failure(true))
        .with_step(step(0))
        .with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;

    let execution = orchestrator
        .start_schedule_execution(schedule.id, Initiator::System)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::Queued);
    assert_eq!(execution.current_step_index, 0);
    assert_eq!(execution.total_steps, 4);
    assert_eq!(execution.schedule_name, "nightly");

    let first = tasks_at(&store, execution.id, 0).await;
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|t| t.status == WorkerTaskStatus::Queued));
    assert!(first.iter().all(|t| t.execution_mode == ExecutionMode::Parallel));
    assert_eq!(first.iter().filter(|t| t.continue_on_failure).count(), 1);

    let second = tasks_at(&store, execution.id, 1).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].status, WorkerTaskStatus::WaitingForPreviousStep);
    assert_eq!(second[0].execution_mode, ExecutionMode::Sequential);
    assert_eq!(second[0].schedule_execution_id, Some(execution.id));
}

#[tokio::test]
async fn test_single_step_group_is_sequential() {
    let (store, orchestrator, schedule) = setup(Schedule::new("single").with_step(step(0))).await;
    let id = start(&orchestrator, &schedule).await;

    let tasks = store.list_worker_tasks(id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].execution_mode, ExecutionMode::Sequential);
    assert_eq!(tasks[0].status, WorkerTaskStatus::Queued);
}

#[tokio::test]
async fn test_first_group_is_lowest_index() {
    let schedule = Schedule::new("sparse").with_step(step(5)).with_step(step(2));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.current_step_index, 2);
    assert_eq!(tasks_at(&store, id, 2).await[0].status, WorkerTaskStatus::Queued);
    assert_eq!(
        tasks_at(&store, id, 5).await[0].status,
        WorkerTaskStatus::WaitingForPreviousStep
    );
}

#[tokio::test]
async fn test_schedule_without_steps_starts_nothing() {
    let (store, orchestrator, schedule) = setup(Schedule::new("empty")).await;

    let execution = orchestrator
        .start_schedule_execution(schedule.id, Initiator::System)
        .await
        .unwrap();
    assert!(execution.is_none());
    assert!(store
        .list_schedule_executions(schedule.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_disabled_schedule_rejected() {
    let mut schedule = Schedule::new("off").with_step(step(0));
    schedule.enabled = false;
    let (_store, orchestrator, schedule) = setup(schedule).await;

    let err = orchestrator
        .start_schedule_execution(schedule.id, Initiator::System)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidState { .. }));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_execution() {
    let schedule = Schedule::new("cancel me")
        .with_step(step(0))
        .with_step(step(0))
        .with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let running = store.claim_next_queued_task().await.unwrap().unwrap();
    assert!(orchestrator.cancel_schedule_execution(id).await.unwrap());

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::Cancelled);
    assert_eq!(execution.error_message.as_deref(), Some(CANCELLED_BY_USER));
    assert!(execution.completed_at.is_some());

    let first = tasks_at(&store, id, 0).await;
    let processing = first.iter().find(|t| t.id == running.id).unwrap();
    assert_eq!(processing.status, WorkerTaskStatus::Processing);
    let queued = first.iter().find(|t| t.id != running.id).unwrap();
    assert_eq!(queued.status, WorkerTaskStatus::CancellationRequested);

    assert!(tasks_at(&store, id, 1).await.is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_or_finished_execution_is_noop() {
    let (store, orchestrator, schedule) = setup(Schedule::new("once").with_step(step(0))).await;

    assert!(!orchestrator
        .cancel_schedule_execution(ScheduleExecutionId::new())
        .await
        .unwrap());

    let id = start(&orchestrator, &schedule).await;
    assert!(orchestrator.cancel_schedule_execution(id).await.unwrap());
    let writes = store.write_count().await;

    assert!(!orchestrator.cancel_schedule_execution(id).await.unwrap());
    assert_eq!(store.write_count().await, writes);
}

#[tokio::test]
async fn test_request_task_cancellation() {
    let schedule = Schedule::new("tasks").with_step(step(0)).with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let running = store.claim_next_queued_task().await.unwrap().unwrap();
    assert!(orchestrator.request_task_cancellation(running.id).await.unwrap());
    let task = store.get_worker_task(running.id).await.unwrap().unwrap();
    assert_eq!(task.status, WorkerTaskStatus::CancellationRequested);

    // A second request has nothing left to do.
    assert!(!orchestrator.request_task_cancellation(running.id).await.unwrap());

    let waiting = &tasks_at(&store, id, 1).await[0];
    assert!(orchestrator.request_task_cancellation(waiting.id).await.unwrap());
}

#[tokio::test]
async fn test_cancelled_running_task_completes_as_failed() {
    let (store, orchestrator, schedule) = setup(Schedule::new("stop").with_step(step(0))).await;
    let id = start(&orchestrator, &schedule).await;

    let running = store.claim_next_queued_task().await.unwrap().unwrap();
    orchestrator.request_task_cancellation(running.id).await.unwrap();
    let task = orchestrator
        .complete_task(running.id, TaskOutcome::Cancelled)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, WorkerTaskStatus::Failed);

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::Failed);
}

// =============================================================================
// Advancing
// =============================================================================

#[tokio::test]
async fn test_mark_task_processing_starts_execution() {
    let (store, orchestrator, schedule) = setup(Schedule::new("start").with_step(step(0))).await;
    let id = start(&orchestrator, &schedule).await;
    let task = store.list_worker_tasks(id).await.unwrap().remove(0);

    assert!(orchestrator.mark_task_processing(task.id).await.unwrap());

    let task = store.get_worker_task(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, WorkerTaskStatus::Processing);
    assert!(task.started_at.is_some());
    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::InProgress);
    assert!(execution.started_at.is_some());
}

#[tokio::test]
async fn test_groups_run_in_order_until_completed() {
    let schedule = Schedule::new("chain").with_step(step(0)).with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let first = store.claim_next_queued_task().await.unwrap().unwrap();
    assert_eq!(first.step_index, 0);
    // Waiting tasks are never claimed.
    assert!(store.claim_next_queued_task().await.unwrap().is_none());

    orchestrator
        .complete_task(first.id, TaskOutcome::Completed)
        .await
        .unwrap();
    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.current_step_index, 1);
    assert_eq!(execution.status, ScheduleExecutionStatus::InProgress);

    let second = store.claim_next_queued_task().await.unwrap().unwrap();
    assert_eq!(second.step_index, 1);
    orchestrator
        .complete_task(second.id, TaskOutcome::Completed)
        .await
        .unwrap();

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());
}

#[tokio::test]
async fn test_group_waits_for_all_parallel_tasks() {
    let schedule = Schedule::new("fan out")
        .with_step(step(0))
        .with_step(step(0))
        .with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let a = store.claim_next_queued_task().await.unwrap().unwrap();
    let b = store.claim_next_queued_task().await.unwrap().unwrap();

    orchestrator.complete_task(a.id, TaskOutcome::Completed).await.unwrap();
    assert_eq!(
        orchestrator.advance_schedule_execution(id).await.unwrap(),
        AdvanceOutcome::Waiting
    );
    assert_eq!(
        tasks_at(&store, id, 1).await[0].status,
        WorkerTaskStatus::WaitingForPreviousStep
    );

    orchestrator.complete_task(b.id, TaskOutcome::Completed).await.unwrap();
    assert_eq!(tasks_at(&store, id, 1).await[0].status, WorkerTaskStatus::Queued);
}

#[tokio::test]
async fn test_failure_stops_execution_and_removes_later_tasks() {
    let schedule = Schedule::new("fragile")
        .with_step(step(0))
        .with_step(step(1))
        .with_step(step(2));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let task = store.claim_next_queued_task().await.unwrap().unwrap();
    orchestrator
        .complete_task(task.id, TaskOutcome::Failed("connector unreachable".into()))
        .await
        .unwrap();

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::Failed);
    let message = execution.error_message.unwrap();
    assert!(message.contains("Step 0"));
    assert!(message.contains("connector unreachable"));

    let remaining = store.list_worker_tasks(id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, task.id);
}

#[tokio::test]
async fn test_continue_on_failure_releases_next_group() {
    let schedule = Schedule::new("tolerant")
        .with_step(step(0).continue_on_failure(true))
        .with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    let task = store.claim_next_queued_task().await.unwrap().unwrap();
    orchestrator
        .complete_task(task.id, TaskOutcome::Failed("partial".into()))
        .await
        .unwrap();

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.status, ScheduleExecutionStatus::InProgress);
    assert_eq!(execution.current_step_index, 1);
    assert_eq!(tasks_at(&store, id, 1).await[0].status, WorkerTaskStatus::Queued);
}

#[tokio::test]
async fn test_concurrent_advance_releases_group_once() {
    let schedule = Schedule::new("race")
        .with_step(step(0))
        .with_step(step(0))
        .with_step(step(1));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    for _ in 0..2 {
        let task = store.claim_next_queued_task().await.unwrap().unwrap();
        let done = WorkerTask {
            status: WorkerTaskStatus::Completed,
            ..task
        };
        assert!(store
            .update_worker_task_if(done, WorkerTaskStatus::Processing)
            .await
            .unwrap());
    }

    let (a, b) = tokio::join!(
        orchestrator.advance_schedule_execution(id),
        orchestrator.advance_schedule_execution(id)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == AdvanceOutcome::Released(1))
            .count(),
        1
    );

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.current_step_index, 1);
}

#[tokio::test]
async fn test_removed_tasks_do_not_block_group() {
    let schedule = Schedule::new("skip")
        .with_step(step(0))
        .with_step(step(1))
        .with_step(step(2));
    let (store, orchestrator, schedule) = setup(schedule).await;
    let id = start(&orchestrator, &schedule).await;

    // Step 1 is cancelled before it is released and removed by a worker.
    let waiting = tasks_at(&store, id, 1).await.remove(0);
    orchestrator.request_task_cancellation(waiting.id).await.unwrap();
    store
        .delete_worker_task_if(waiting.id, WorkerTaskStatus::CancellationRequested)
        .await
        .unwrap();

    let first = store.claim_next_queued_task().await.unwrap().unwrap();
    orchestrator
        .complete_task(first.id, TaskOutcome::Completed)
        .await
        .unwrap();

    let execution = store.get_schedule_execution(id).await.unwrap().unwrap();
    assert_eq!(execution.current_step_index, 2);
    assert_eq!(tasks_at(&store, id, 2).await[0].status, WorkerTaskStatus::Queued);
}
