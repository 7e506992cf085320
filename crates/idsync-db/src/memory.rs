//! In-memory reference store.
//!
//! Holds the whole state behind one `RwLock`, so every trait method is
//! trivially atomic. Used by the worker binary for demos and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use idsync_core::{
    ActivityId, ConnectedSystemId, ConnectedSystemObjectId, MetaverseAttributeId,
    MetaverseObjectId, MetaverseObjectTypeId, ObjectTypeId, PendingExportId, ScheduleExecutionId,
    ScheduleId, SyncRuleId, SyncRuleMappingId, WorkerTaskId,
};

use crate::error::{StoreError, StoreResult};
use crate::models::{
    normalize_external_id, Activity, AttributeValue, ConnectedSystem, ConnectedSystemObject,
    ConnectedSystemObjectStatus, ConnectedSystemObjectUpdate, JoinType, MetaverseAttributeChange,
    MetaverseObject, MetaverseObjectType, MetaverseValue, PendingExport, ReferenceResolution,
    Schedule, ScheduleExecution, SyncRule, SyncRuleMapping, UnresolvedReference, WorkerTask,
    WorkerTaskStatus,
};
use crate::repository::{
    ActivityRepository, AppliedExecutionChange, ConnectedSystemObjectRepository,
    ConnectedSystemRepository, ExecutionChangeSet, MetaverseRepository, PendingExportRepository,
    ScheduleRepository, SyncRuleRepository, TaskTransitionAction, WorkerTaskRepository,
};

type ExternalIdKey = (ConnectedSystemId, ObjectTypeId, String);

#[derive(Default)]
struct MemoryState {
    connected_systems: HashMap<ConnectedSystemId, ConnectedSystem>,
    csos: HashMap<ConnectedSystemObjectId, ConnectedSystemObject>,
    cso_external_ids: HashMap<ExternalIdKey, ConnectedSystemObjectId>,
    metaverse_object_types: HashMap<MetaverseObjectTypeId, MetaverseObjectType>,
    mvos: HashMap<MetaverseObjectId, MetaverseObject>,
    sync_rules: HashMap<SyncRuleId, SyncRule>,
    pending_exports: HashMap<PendingExportId, PendingExport>,
    schedules: HashMap<ScheduleId, Schedule>,
    executions: HashMap<ScheduleExecutionId, ScheduleExecution>,
    worker_tasks: HashMap<WorkerTaskId, WorkerTask>,
    activities: HashMap<ActivityId, Activity>,
    /// Number of successful mutating calls, for idempotency checks.
    write_count: u64,
}

impl MemoryState {
    fn index_key(cso: &ConnectedSystemObject) -> Option<ExternalIdKey> {
        cso.external_id_key()
            .map(|key| (cso.connected_system_id, cso.object_type_id, key))
    }

    fn cso_mut(&mut self, id: ConnectedSystemObjectId) -> StoreResult<&mut ConnectedSystemObject> {
        self.csos
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ConnectedSystemObject", id))
    }
}

/// Store keeping everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls that changed state so far.
    pub async fn write_count(&self) -> u64 {
        self.state.read().await.write_count
    }

    pub async fn cso_count(&self) -> usize {
        self.state.read().await.csos.len()
    }
}

#[async_trait]
impl ConnectedSystemRepository for MemoryStore {
    async fn get_connected_system(
        &self,
        id: ConnectedSystemId,
    ) -> StoreResult<Option<ConnectedSystem>> {
        Ok(self.state.read().await.connected_systems.get(&id).cloned())
    }

    async fn list_connected_systems(&self) -> StoreResult<Vec<ConnectedSystem>> {
        let mut systems: Vec<_> = self
            .state
            .read()
            .await
            .connected_systems
            .values()
            .cloned()
            .collect();
        systems.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(systems)
    }

    async fn save_connected_system(&self, system: ConnectedSystem) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.connected_systems.insert(system.id, system);
        state.write_count += 1;
        Ok(())
    }

    async fn update_persisted_connector_data(
        &self,
        id: ConnectedSystemId,
        data: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let system = state
            .connected_systems
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ConnectedSystem", id))?;
        system.persisted_connector_data = data;
        state.write_count += 1;
        Ok(())
    }

    async fn update_last_sync_completed_at(
        &self,
        id: ConnectedSystemId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let system = state
            .connected_systems
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("ConnectedSystem", id))?;
        system.last_sync_completed_at = Some(at);
        state.write_count += 1;
        Ok(())
    }
}

#[async_trait]
impl ConnectedSystemObjectRepository for MemoryStore {
    async fn get_cso(
        &self,
        id: ConnectedSystemObjectId,
    ) -> StoreResult<Option<ConnectedSystemObject>> {
        Ok(self.state.read().await.csos.get(&id).cloned())
    }

    async fn find_cso_by_external_id(
        &self,
        system: ConnectedSystemId,
        object_type: ObjectTypeId,
        external_id: &str,
    ) -> StoreResult<Option<ConnectedSystemObject>> {
        let state = self.state.read().await;
        let key = (system, object_type, normalize_external_id(external_id));
        Ok(state
            .cso_external_ids
            .get(&key)
            .and_then(|id| state.csos.get(id))
            .cloned())
    }

    async fn find_csos_by_external_id_any_type(
        &self,
        system: ConnectedSystemId,
        external_id: &str,
    ) -> StoreResult<Vec<ConnectedSystemObjectId>> {
        let state = self.state.read().await;
        let wanted = normalize_external_id(external_id);
        let mut ids: Vec<_> = state
            .cso_external_ids
            .iter()
            .filter(|((sys, _, key), _)| *sys == system && *key == wanted)
            .map(|(_, id)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_csos(
        &self,
        system: ConnectedSystemId,
        object_type: Option<ObjectTypeId>,
    ) -> StoreResult<Vec<ConnectedSystemObject>> {
        let state = self.state.read().await;
        let mut csos: Vec<_> = state
            .csos
            .values()
            .filter(|c| c.connected_system_id == system)
            .filter(|c| object_type.map_or(true, |t| c.object_type_id == t))
            .cloned()
            .collect();
        csos.sort_by_key(|c| (c.created_at, c.id));
        Ok(csos)
    }

    async fn list_csos_updated_since(
        &self,
        system: ConnectedSystemId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ConnectedSystemObject>> {
        let state = self.state.read().await;
        let mut csos: Vec<_> = state
            .csos
            .values()
            .filter(|c| c.connected_system_id == system && c.updated_at > since)
            .cloned()
            .collect();
        csos.sort_by_key(|c| (c.created_at, c.id));
        Ok(csos)
    }

    async fn list_csos_joined_to(
        &self,
        mvo: MetaverseObjectId,
    ) -> StoreResult<Vec<ConnectedSystemObject>> {
        let state = self.state.read().await;
        Ok(state
            .csos
            .values()
            .filter(|c| c.metaverse_object_id == Some(mvo))
            .cloned()
            .collect())
    }

    async fn create_cso(&self, cso: ConnectedSystemObject) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.csos.contains_key(&cso.id) {
            return Err(StoreError::Conflict(format!(
                "ConnectedSystemObject {} already exists",
                cso.id
            )));
        }
        if let Some(key) = MemoryState::index_key(&cso) {
            if state.cso_external_ids.contains_key(&key) {
                return Err(StoreError::Conflict(format!(
                    "external id '{}' already exists for object type {}",
                    key.2, key.1
                )));
            }
            state.cso_external_ids.insert(key, cso.id);
        }
        debug!(cso_id = %cso.id, "Created connected system object");
        state.csos.insert(cso.id, cso);
        state.write_count += 1;
        Ok(())
    }

    async fn apply_cso_update(
        &self,
        id: ConnectedSystemObjectId,
        update: ConnectedSystemObjectUpdate,
    ) -> StoreResult<ConnectedSystemObject> {
        let mut state = self.state.write().await;
        let current = state
            .csos
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ConnectedSystemObject", id))?;
        if update.is_empty() {
            return Ok(current);
        }

        let mut next = current.clone();
        next.apply_changes(&update.attribute_changes);
        if let Some(status) = update.status {
            next.status = status;
        }
        next.updated_at = Utc::now();

        // Validate the new key before touching anything.
        let old_key = MemoryState::index_key(&current);
        let new_key = MemoryState::index_key(&next);
        if new_key != old_key {
            if let Some(key) = &new_key {
                if let Some(owner) = state.cso_external_ids.get(key) {
                    if *owner != id {
                        return Err(StoreError::Conflict(format!(
                            "external id '{}' already exists for object type {}",
                            key.2, key.1
                        )));
                    }
                }
            }
            if let Some(key) = old_key {
                state.cso_external_ids.remove(&key);
            }
            if let Some(key) = new_key {
                state.cso_external_ids.insert(key, id);
            }
        }

        state.csos.insert(id, next.clone());
        state.write_count += 1;
        Ok(next)
    }

    async fn mark_csos_obsolete(&self, ids: &[ConnectedSystemObjectId]) -> StoreResult<u32> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for id in ids {
            let cso = state.cso_mut(*id)?;
            if cso.status != ConnectedSystemObjectStatus::Obsolete {
                cso.status = ConnectedSystemObjectStatus::Obsolete;
                cso.updated_at = now;
                changed += 1;
            }
        }
        if changed > 0 {
            state.write_count += 1;
        }
        Ok(changed)
    }

    async fn set_cso_join(
        &self,
        id: ConnectedSystemObjectId,
        mvo: Option<MetaverseObjectId>,
        join_type: Option<JoinType>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let cso = state.cso_mut(id)?;
        cso.metaverse_object_id = mvo;
        cso.join_type = join_type;
        state.write_count += 1;
        Ok(())
    }

    async fn list_unresolved_references(
        &self,
        system: ConnectedSystemId,
    ) -> StoreResult<Vec<UnresolvedReference>> {
        let state = self.state.read().await;
        let mut refs = Vec::new();
        for cso in state.csos.values() {
            if cso.connected_system_id != system {
                continue;
            }
            for row in &cso.attribute_values {
                if let AttributeValue::Reference(reference) = &row.value {
                    if !reference.is_resolved() {
                        refs.push(UnresolvedReference {
                            connected_system_object_id: cso.id,
                            attribute_value_id: row.id,
                            attribute_id: row.attribute_id,
                            unresolved_reference_value: reference
                                .unresolved_reference_value
                                .clone(),
                        });
                    }
                }
            }
        }
        Ok(refs)
    }

    async fn resolve_references(&self, resolutions: &[ReferenceResolution]) -> StoreResult<u32> {
        let wanted: HashMap<_, _> = resolutions
            .iter()
            .map(|r| (r.attribute_value_id, r.target))
            .collect();
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut resolved = 0;
        for cso in state.csos.values_mut() {
            let mut changed = false;
            for row in &mut cso.attribute_values {
                if let Some(target) = wanted.get(&row.id) {
                    if let AttributeValue::Reference(reference) = &mut row.value {
                        reference.reference_value_id = Some(*target);
                        resolved += 1;
                        changed = true;
                    }
                }
            }
            // Delta syncs pick the object up again.
            if changed {
                cso.updated_at = now;
            }
        }
        if resolved > 0 {
            state.write_count += 1;
        }
        Ok(resolved)
    }
}

#[async_trait]
impl MetaverseRepository for MemoryStore {
    async fn get_metaverse_object_type(
        &self,
        id: MetaverseObjectTypeId,
    ) -> StoreResult<Option<MetaverseObjectType>> {
        Ok(self
            .state
            .read()
            .await
            .metaverse_object_types
            .get(&id)
            .cloned())
    }

    async fn list_metaverse_object_types(&self) -> StoreResult<Vec<MetaverseObjectType>> {
        Ok(self
            .state
            .read()
            .await
            .metaverse_object_types
            .values()
            .cloned()
            .collect())
    }

    async fn save_metaverse_object_type(
        &self,
        object_type: MetaverseObjectType,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .metaverse_object_types
            .insert(object_type.id, object_type);
        state.write_count += 1;
        Ok(())
    }

    async fn get_mvo(&self, id: MetaverseObjectId) -> StoreResult<Option<MetaverseObject>> {
        Ok(self.state.read().await.mvos.get(&id).cloned())
    }

    async fn create_mvo(&self, mvo: MetaverseObject) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.mvos.contains_key(&mvo.id) {
            return Err(StoreError::Conflict(format!(
                "MetaverseObject {} already exists",
                mvo.id
            )));
        }
        state.mvos.insert(mvo.id, mvo);
        state.write_count += 1;
        Ok(())
    }

    async fn apply_mvo_changes(
        &self,
        id: MetaverseObjectId,
        changes: Vec<MetaverseAttributeChange>,
    ) -> StoreResult<MetaverseObject> {
        let mut state = self.state.write().await;
        let mvo = state
            .mvos
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("MetaverseObject", id))?;
        if changes.iter().all(|c| c.is_empty()) {
            return Ok(mvo.clone());
        }
        mvo.apply_changes(&changes);
        mvo.updated_at = Utc::now();
        let updated = mvo.clone();
        state.write_count += 1;
        Ok(updated)
    }

    async fn find_mvos_by_value(
        &self,
        object_type: MetaverseObjectTypeId,
        attribute: MetaverseAttributeId,
        value: &MetaverseValue,
    ) -> StoreResult<Vec<MetaverseObject>> {
        let state = self.state.read().await;
        Ok(state
            .mvos
            .values()
            .filter(|m| m.object_type_id == object_type && m.has_value(attribute, value))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SyncRuleRepository for MemoryStore {
    async fn get_sync_rule(&self, id: SyncRuleId) -> StoreResult<Option<SyncRule>> {
        Ok(self.state.read().await.sync_rules.get(&id).cloned())
    }

    async fn list_sync_rules(
        &self,
        system: Option<ConnectedSystemId>,
    ) -> StoreResult<Vec<SyncRule>> {
        let state = self.state.read().await;
        let mut rules: Vec<_> = state
            .sync_rules
            .values()
            .filter(|r| system.map_or(true, |s| r.connected_system_id == s))
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.created_at, r.id));
        Ok(rules)
    }

    async fn save_sync_rule(&self, rule: SyncRule) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.sync_rules.insert(rule.id, rule);
        state.write_count += 1;
        Ok(())
    }

    async fn get_sync_rule_mapping(
        &self,
        id: SyncRuleMappingId,
    ) -> StoreResult<Option<SyncRuleMapping>> {
        let state = self.state.read().await;
        Ok(state
            .sync_rules
            .values()
            .find_map(|r| r.mapping(id))
            .cloned())
    }

    async fn save_sync_rule_mapping(&self, mapping: SyncRuleMapping) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let rule = state
            .sync_rules
            .get_mut(&mapping.sync_rule_id)
            .ok_or_else(|| StoreError::not_found("SyncRule", mapping.sync_rule_id))?;
        match rule.mappings.iter_mut().find(|m| m.id == mapping.id) {
            Some(existing) => *existing = mapping,
            None => rule.mappings.push(mapping),
        }
        state.write_count += 1;
        Ok(())
    }
}

#[async_trait]
impl PendingExportRepository for MemoryStore {
    async fn list_pending_exports(
        &self,
        system: ConnectedSystemId,
    ) -> StoreResult<Vec<PendingExport>> {
        let state = self.state.read().await;
        let mut exports: Vec<_> = state
            .pending_exports
            .values()
            .filter(|e| e.connected_system_id == system)
            .cloned()
            .collect();
        exports.sort_by_key(|e| (e.created_at, e.id));
        Ok(exports)
    }

    async fn get_pending_export_for_cso(
        &self,
        cso: ConnectedSystemObjectId,
    ) -> StoreResult<Option<PendingExport>> {
        let state = self.state.read().await;
        Ok(state
            .pending_exports
            .values()
            .find(|e| e.connected_system_object_id == cso)
            .cloned())
    }

    async fn replace_pending_export(&self, export: PendingExport) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .pending_exports
            .retain(|_, e| e.connected_system_object_id != export.connected_system_object_id);
        state.pending_exports.insert(export.id, export);
        state.write_count += 1;
        Ok(())
    }

    async fn delete_pending_export(&self, id: PendingExportId) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .pending_exports
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("PendingExport", id))?;
        state.write_count += 1;
        Ok(())
    }

    async fn record_pending_export_failure(
        &self,
        id: PendingExportId,
        error: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let export = state
            .pending_exports
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("PendingExport", id))?;
        export.error_count += 1;
        export.last_error = Some(error.to_string());
        export.last_attempted_at = Some(at);
        state.write_count += 1;
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn get_schedule(&self, id: ScheduleId) -> StoreResult<Option<Schedule>> {
        Ok(self.state.read().await.schedules.get(&id).cloned())
    }

    async fn save_schedule(&self, schedule: Schedule) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.schedules.insert(schedule.id, schedule);
        state.write_count += 1;
        Ok(())
    }

    async fn create_schedule_execution(
        &self,
        execution: ScheduleExecution,
        tasks: Vec<WorkerTask>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.executions.contains_key(&execution.id) {
            return Err(StoreError::Conflict(format!(
                "ScheduleExecution {} already exists",
                execution.id
            )));
        }
        for task in tasks {
            state.worker_tasks.insert(task.id, task);
        }
        state.executions.insert(execution.id, execution);
        state.write_count += 1;
        Ok(())
    }

    async fn get_schedule_execution(
        &self,
        id: ScheduleExecutionId,
    ) -> StoreResult<Option<ScheduleExecution>> {
        Ok(self.state.read().await.executions.get(&id).cloned())
    }

    async fn list_schedule_executions(
        &self,
        schedule: ScheduleId,
    ) -> StoreResult<Vec<ScheduleExecution>> {
        let state = self.state.read().await;
        let mut executions: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.schedule_id == schedule)
            .cloned()
            .collect();
        executions.sort_by_key(|e| e.queued_at);
        Ok(executions)
    }

    async fn apply_execution_changes(
        &self,
        changes: ExecutionChangeSet,
    ) -> StoreResult<AppliedExecutionChange> {
        let mut state = self.state.write().await;
        let current = state
            .executions
            .get(&changes.execution.id)
            .ok_or_else(|| StoreError::not_found("ScheduleExecution", changes.execution.id))?;
        if !changes.expected_statuses.contains(&current.status)
            || current.current_step_index != changes.expected_step_index
        {
            return Ok(AppliedExecutionChange::default());
        }

        let mut transitioned = Vec::new();
        for transition in changes.task_transitions {
            let matches = state
                .worker_tasks
                .get(&transition.task_id)
                .map_or(false, |t| t.status == transition.expected_status);
            if !matches {
                continue;
            }
            match transition.action {
                TaskTransitionAction::SetStatus(status) => {
                    if let Some(task) = state.worker_tasks.get_mut(&transition.task_id) {
                        task.status = status;
                    }
                }
                TaskTransitionAction::Delete => {
                    state.worker_tasks.remove(&transition.task_id);
                }
            }
            transitioned.push(transition.task_id);
        }

        state
            .executions
            .insert(changes.execution.id, changes.execution);
        state.write_count += 1;
        Ok(AppliedExecutionChange {
            applied: true,
            transitioned,
        })
    }
}

#[async_trait]
impl WorkerTaskRepository for MemoryStore {
    async fn create_worker_task(&self, task: WorkerTask) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.worker_tasks.insert(task.id, task);
        state.write_count += 1;
        Ok(())
    }

    async fn get_worker_task(&self, id: WorkerTaskId) -> StoreResult<Option<WorkerTask>> {
        Ok(self.state.read().await.worker_tasks.get(&id).cloned())
    }

    async fn list_worker_tasks(
        &self,
        execution: ScheduleExecutionId,
    ) -> StoreResult<Vec<WorkerTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<_> = state
            .worker_tasks
            .values()
            .filter(|t| t.schedule_execution_id == Some(execution))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.step_index, t.created_at, t.id));
        Ok(tasks)
    }

    async fn list_worker_tasks_by_status(
        &self,
        status: WorkerTaskStatus,
    ) -> StoreResult<Vec<WorkerTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<_> = state
            .worker_tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn claim_next_queued_task(&self) -> StoreResult<Option<WorkerTask>> {
        let mut state = self.state.write().await;
        let next = state
            .worker_tasks
            .values()
            .filter(|t| t.status == WorkerTaskStatus::Queued)
            .min_by_key(|t| (t.created_at, t.step_index, t.id))
            .map(|t| t.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let claimed = state.worker_tasks.get_mut(&id).map(|task| {
            task.status = WorkerTaskStatus::Processing;
            task.started_at = Some(Utc::now());
            task.clone()
        });
        state.write_count += 1;
        Ok(claimed)
    }

    async fn update_worker_task_if(
        &self,
        task: WorkerTask,
        expected_status: WorkerTaskStatus,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let current = state
            .worker_tasks
            .get(&task.id)
            .ok_or_else(|| StoreError::not_found("WorkerTask", task.id))?;
        if current.status != expected_status {
            return Ok(false);
        }
        state.worker_tasks.insert(task.id, task);
        state.write_count += 1;
        Ok(true)
    }

    async fn delete_worker_task_if(
        &self,
        id: WorkerTaskId,
        expected_status: WorkerTaskStatus,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let matches = state
            .worker_tasks
            .get(&id)
            .map_or(false, |t| t.status == expected_status);
        if matches {
            state.worker_tasks.remove(&id);
            state.write_count += 1;
        }
        Ok(matches)
    }
}

#[async_trait]
impl ActivityRepository for MemoryStore {
    async fn create_activity(&self, activity: Activity) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.activities.insert(activity.id, activity);
        state.write_count += 1;
        Ok(())
    }

    async fn update_activity(&self, activity: Activity) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.activities.contains_key(&activity.id) {
            return Err(StoreError::not_found("Activity", activity.id));
        }
        state.activities.insert(activity.id, activity);
        state.write_count += 1;
        Ok(())
    }

    async fn get_activity(&self, id: ActivityId) -> StoreResult<Option<Activity>> {
        Ok(self.state.read().await.activities.get(&id).cloned())
    }

    async fn list_activities(&self, system: ConnectedSystemId) -> StoreResult<Vec<Activity>> {
        let state = self.state.read().await;
        let mut activities: Vec<_> = state
            .activities
            .values()
            .filter(|a| a.connected_system_id == system)
            .cloned()
            .collect();
        activities.sort_by_key(|a| a.started_at);
        Ok(activities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CsoReference, StoredAttributeValue};
    use idsync_core::AttributeId;

    fn cso_with_external_id(
        system: ConnectedSystemId,
        object_type: ObjectTypeId,
        ext: AttributeId,
        value: &str,
    ) -> ConnectedSystemObject {
        let mut cso = ConnectedSystemObject::new(system, object_type, ext);
        cso.attribute_values
            .push(StoredAttributeValue::new(ext, AttributeValue::Text(value.into())));
        cso
    }

    #[tokio::test]
    async fn test_external_id_uniqueness() {
        let store = MemoryStore::new();
        let system = ConnectedSystemId::new();
        let object_type = ObjectTypeId::new();
        let ext = AttributeId::new();

        store
            .create_cso(cso_with_external_id(system, object_type, ext, "E1"))
            .await
            .unwrap();
        let err = store
            .create_cso(cso_with_external_id(system, object_type, ext, "E1"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Same external id under another object type is a different key.
        store
            .create_cso(cso_with_external_id(system, ObjectTypeId::new(), ext, "E1"))
            .await
            .unwrap();
        assert_eq!(store.cso_count().await, 2);
    }

    #[tokio::test]
    async fn test_find_by_external_id_normalizes_guids() {
        let store = MemoryStore::new();
        let system = ConnectedSystemId::new();
        let object_type = ObjectTypeId::new();
        let ext = AttributeId::new();
        let cso = cso_with_external_id(
            system,
            object_type,
            ext,
            "550e8400-e29b-41d4-a716-446655440000",
        );
        let id = cso.id;
        store.create_cso(cso).await.unwrap();

        let found = store
            .find_cso_by_external_id(system, object_type, "550E8400-E29B-41D4-A716-446655440000")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn test_empty_update_is_not_a_write() {
        let store = MemoryStore::new();
        let cso = cso_with_external_id(
            ConnectedSystemId::new(),
            ObjectTypeId::new(),
            AttributeId::new(),
            "E1",
        );
        let id = cso.id;
        store.create_cso(cso).await.unwrap();
        let writes = store.write_count().await;

        store
            .apply_cso_update(id, ConnectedSystemObjectUpdate::default())
            .await
            .unwrap();
        assert_eq!(store.write_count().await, writes);
    }

    #[tokio::test]
    async fn test_resolve_references() {
        let store = MemoryStore::new();
        let system = ConnectedSystemId::new();
        let ext = AttributeId::new();
        let manager = AttributeId::new();
        let mut cso = cso_with_external_id(system, ObjectTypeId::new(), ext, "E2");
        let row = StoredAttributeValue::new(
            manager,
            AttributeValue::Reference(CsoReference::unresolved("E1")),
        );
        let row_id = row.id;
        cso.attribute_values.push(row);
        let cso_id = cso.id;
        store.create_cso(cso).await.unwrap();

        let unresolved = store.list_unresolved_references(system).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].unresolved_reference_value, "E1");

        let target = ConnectedSystemObjectId::new();
        let count = store
            .resolve_references(&[ReferenceResolution {
                attribute_value_id: row_id,
                target,
            }])
            .await
            .unwrap();
        assert_eq!(count, 1);

        let cso = store.get_cso(cso_id).await.unwrap().unwrap();
        let reference = cso.first_value(manager).unwrap();
        match reference {
            AttributeValue::Reference(r) => {
                assert_eq!(r.reference_value_id, Some(target));
                assert_eq!(r.unresolved_reference_value, "E1");
            }
            other => panic!("unexpected value {other:?}"),
        }
        assert!(store.list_unresolved_references(system).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_next_queued_task_is_exclusive() {
        let store = MemoryStore::new();
        let task = WorkerTask::ad_hoc(
            ConnectedSystemId::new(),
            idsync_core::RunProfileId::new(),
            crate::models::Initiator::System,
        );
        store.create_worker_task(task.clone()).await.unwrap();

        let claimed = store.claim_next_queued_task().await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, WorkerTaskStatus::Processing);
        assert!(claimed.started_at.is_some());
        assert!(store.claim_next_queued_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_pending_export_keeps_one_per_cso() {
        let store = MemoryStore::new();
        let system = ConnectedSystemId::new();
        let cso = ConnectedSystemObjectId::new();
        let make = || PendingExport {
            id: PendingExportId::new(),
            connected_system_id: system,
            connected_system_object_id: cso,
            object_type_name: "user".into(),
            external_id: Some("E1".into()),
            change_type: crate::models::PendingExportChangeType::Update,
            attribute_changes: vec![],
            error_count: 0,
            last_error: None,
            created_at: Utc::now(),
            last_attempted_at: None,
        };

        store.replace_pending_export(make()).await.unwrap();
        let second = make();
        let second_id = second.id;
        store.replace_pending_export(second).await.unwrap();

        let exports = store.list_pending_exports(system).await.unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].id, second_id);
    }
}
