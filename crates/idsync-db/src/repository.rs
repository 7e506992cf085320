//! Store contract.
//!
//! The engine only talks to persistence through these traits. Every method
//! that must be atomic (one CSO's value changes, execution start/cancel,
//! step group release, task claim) is a single call so an implementation can
//! wrap it in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use idsync_core::{
    ActivityId, ConnectedSystemId, ConnectedSystemObjectId, MetaverseAttributeId,
    MetaverseObjectId, MetaverseObjectTypeId, ObjectTypeId, PendingExportId, ScheduleExecutionId,
    ScheduleId, SyncRuleId, SyncRuleMappingId, WorkerTaskId,
};

use crate::error::StoreResult;
use crate::models::{
    Activity, ConnectedSystem, ConnectedSystemObject, ConnectedSystemObjectUpdate, JoinType,
    MetaverseAttributeChange, MetaverseObject, MetaverseObjectType, MetaverseValue,
    PendingExport, ReferenceResolution, Schedule, ScheduleExecution, ScheduleExecutionStatus,
    SyncRule, SyncRuleMapping, UnresolvedReference, WorkerTask, WorkerTaskStatus,
};

#[async_trait]
pub trait ConnectedSystemRepository: Send + Sync {
    async fn get_connected_system(&self, id: ConnectedSystemId)
        -> StoreResult<Option<ConnectedSystem>>;

    async fn list_connected_systems(&self) -> StoreResult<Vec<ConnectedSystem>>;

    /// Insert or replace.
    async fn save_connected_system(&self, system: ConnectedSystem) -> StoreResult<()>;

    async fn update_persisted_connector_data(
        &self,
        id: ConnectedSystemId,
        data: Option<String>,
    ) -> StoreResult<()>;

    async fn update_last_sync_completed_at(
        &self,
        id: ConnectedSystemId,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait ConnectedSystemObjectRepository: Send + Sync {
    async fn get_cso(&self, id: ConnectedSystemObjectId)
        -> StoreResult<Option<ConnectedSystemObject>>;

    /// Find a CSO by its normalized external id.
    async fn find_cso_by_external_id(
        &self,
        system: ConnectedSystemId,
        object_type: ObjectTypeId,
        external_id: &str,
    ) -> StoreResult<Option<ConnectedSystemObject>>;

    /// All CSOs of a system carrying the external id, across object types.
    async fn find_csos_by_external_id_any_type(
        &self,
        system: ConnectedSystemId,
        external_id: &str,
    ) -> StoreResult<Vec<ConnectedSystemObjectId>>;

    async fn list_csos(
        &self,
        system: ConnectedSystemId,
        object_type: Option<ObjectTypeId>,
    ) -> StoreResult<Vec<ConnectedSystemObject>>;

    async fn list_csos_updated_since(
        &self,
        system: ConnectedSystemId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ConnectedSystemObject>>;

    async fn list_csos_joined_to(
        &self,
        mvo: MetaverseObjectId,
    ) -> StoreResult<Vec<ConnectedSystemObject>>;

    /// Insert a new CSO. Fails with `Conflict` when the (system, object type,
    /// external id) key is taken.
    async fn create_cso(&self, cso: ConnectedSystemObject) -> StoreResult<()>;

    /// Apply all changes of one CSO atomically and return the new state.
    async fn apply_cso_update(
        &self,
        id: ConnectedSystemObjectId,
        update: ConnectedSystemObjectUpdate,
    ) -> StoreResult<ConnectedSystemObject>;

    /// Mark CSOs obsolete. Returns how many changed status.
    async fn mark_csos_obsolete(&self, ids: &[ConnectedSystemObjectId]) -> StoreResult<u32>;

    /// Join or disconnect a CSO.
    async fn set_cso_join(
        &self,
        id: ConnectedSystemObjectId,
        mvo: Option<MetaverseObjectId>,
        join_type: Option<JoinType>,
    ) -> StoreResult<()>;

    async fn list_unresolved_references(
        &self,
        system: ConnectedSystemId,
    ) -> StoreResult<Vec<UnresolvedReference>>;

    /// Fill the resolved target of reference value rows. Returns how many rows
    /// were updated.
    async fn resolve_references(&self, resolutions: &[ReferenceResolution]) -> StoreResult<u32>;
}

#[async_trait]
pub trait MetaverseRepository: Send + Sync {
    async fn get_metaverse_object_type(
        &self,
        id: MetaverseObjectTypeId,
    ) -> StoreResult<Option<MetaverseObjectType>>;

    async fn list_metaverse_object_types(&self) -> StoreResult<Vec<MetaverseObjectType>>;

    async fn save_metaverse_object_type(&self, object_type: MetaverseObjectType)
        -> StoreResult<()>;

    async fn get_mvo(&self, id: MetaverseObjectId) -> StoreResult<Option<MetaverseObject>>;

    async fn create_mvo(&self, mvo: MetaverseObject) -> StoreResult<()>;

    async fn apply_mvo_changes(
        &self,
        id: MetaverseObjectId,
        changes: Vec<MetaverseAttributeChange>,
    ) -> StoreResult<MetaverseObject>;

    /// Metaverse objects of a type holding the value (join candidates).
    async fn find_mvos_by_value(
        &self,
        object_type: MetaverseObjectTypeId,
        attribute: MetaverseAttributeId,
        value: &MetaverseValue,
    ) -> StoreResult<Vec<MetaverseObject>>;
}

#[async_trait]
pub trait SyncRuleRepository: Send + Sync {
    async fn get_sync_rule(&self, id: SyncRuleId) -> StoreResult<Option<SyncRule>>;

    /// Rules of one system, or all rules.
    async fn list_sync_rules(&self, system: Option<ConnectedSystemId>)
        -> StoreResult<Vec<SyncRule>>;

    async fn save_sync_rule(&self, rule: SyncRule) -> StoreResult<()>;

    async fn get_sync_rule_mapping(&self, id: SyncRuleMappingId)
        -> StoreResult<Option<SyncRuleMapping>>;

    /// Insert or replace a mapping of an existing rule.
    async fn save_sync_rule_mapping(&self, mapping: SyncRuleMapping) -> StoreResult<()>;
}

#[async_trait]
pub trait PendingExportRepository: Send + Sync {
    async fn list_pending_exports(&self, system: ConnectedSystemId)
        -> StoreResult<Vec<PendingExport>>;

    async fn get_pending_export_for_cso(
        &self,
        cso: ConnectedSystemObjectId,
    ) -> StoreResult<Option<PendingExport>>;

    /// Store a pending export, replacing any existing one for the same CSO.
    async fn replace_pending_export(&self, export: PendingExport) -> StoreResult<()>;

    async fn delete_pending_export(&self, id: PendingExportId) -> StoreResult<()>;

    /// Increment the error count and record the error.
    async fn record_pending_export_failure(
        &self,
        id: PendingExportId,
        error: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
}

/// Desired change of one worker task, applied only if the task is still in
/// `expected_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTransition {
    pub task_id: WorkerTaskId,
    pub expected_status: WorkerTaskStatus,
    pub action: TaskTransitionAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransitionAction {
    SetStatus(WorkerTaskStatus),
    Delete,
}

/// An atomic change of an execution and its tasks.
///
/// Nothing is applied unless the stored execution status is one of
/// `expected_statuses` and its current step index equals
/// `expected_step_index`. Each task transition is further guarded by its own
/// expected status; transitions whose guard fails are skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionChangeSet {
    pub execution: ScheduleExecution,
    pub expected_statuses: Vec<ScheduleExecutionStatus>,
    pub expected_step_index: u32,
    pub task_transitions: Vec<TaskTransition>,
}

/// Outcome of an [`ExecutionChangeSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedExecutionChange {
    pub applied: bool,
    /// Tasks whose transition guard matched.
    pub transitioned: Vec<WorkerTaskId>,
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_schedule(&self, id: ScheduleId) -> StoreResult<Option<Schedule>>;

    async fn save_schedule(&self, schedule: Schedule) -> StoreResult<()>;

    /// Create an execution together with all of its tasks.
    async fn create_schedule_execution(
        &self,
        execution: ScheduleExecution,
        tasks: Vec<WorkerTask>,
    ) -> StoreResult<()>;

    async fn get_schedule_execution(
        &self,
        id: ScheduleExecutionId,
    ) -> StoreResult<Option<ScheduleExecution>>;

    async fn list_schedule_executions(
        &self,
        schedule: ScheduleId,
    ) -> StoreResult<Vec<ScheduleExecution>>;

    async fn apply_execution_changes(
        &self,
        changes: ExecutionChangeSet,
    ) -> StoreResult<AppliedExecutionChange>;
}

#[async_trait]
pub trait WorkerTaskRepository: Send + Sync {
    async fn create_worker_task(&self, task: WorkerTask) -> StoreResult<()>;

    async fn get_worker_task(&self, id: WorkerTaskId) -> StoreResult<Option<WorkerTask>>;

    async fn list_worker_tasks(
        &self,
        execution: ScheduleExecutionId,
    ) -> StoreResult<Vec<WorkerTask>>;

    async fn list_worker_tasks_by_status(
        &self,
        status: WorkerTaskStatus,
    ) -> StoreResult<Vec<WorkerTask>>;

    /// Atomically move the oldest Queued task to Processing and return it.
    async fn claim_next_queued_task(&self) -> StoreResult<Option<WorkerTask>>;

    /// Replace a task row if it is still in `expected_status`. Returns false
    /// when the guard failed.
    async fn update_worker_task_if(
        &self,
        task: WorkerTask,
        expected_status: WorkerTaskStatus,
    ) -> StoreResult<bool>;

    /// Delete a task if it is still in `expected_status`.
    async fn delete_worker_task_if(
        &self,
        id: WorkerTaskId,
        expected_status: WorkerTaskStatus,
    ) -> StoreResult<bool>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn create_activity(&self, activity: Activity) -> StoreResult<()>;

    async fn update_activity(&self, activity: Activity) -> StoreResult<()>;

    async fn get_activity(&self, id: ActivityId) -> StoreResult<Option<Activity>>;

    async fn list_activities(&self, system: ConnectedSystemId) -> StoreResult<Vec<Activity>>;
}

/// Everything the engine needs from a store.
pub trait SyncStore:
    ConnectedSystemRepository
    + ConnectedSystemObjectRepository
    + MetaverseRepository
    + SyncRuleRepository
    + PendingExportRepository
    + ScheduleRepository
    + WorkerTaskRepository
    + ActivityRepository
{
}

impl<T> SyncStore for T where
    T: ConnectedSystemRepository
        + ConnectedSystemObjectRepository
        + MetaverseRepository
        + SyncRuleRepository
        + PendingExportRepository
        + ScheduleRepository
        + WorkerTaskRepository
        + ActivityRepository
{
}
