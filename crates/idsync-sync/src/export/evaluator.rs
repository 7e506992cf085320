//! Export evaluation.
//!
//! Computes what each export rule wants a connected system to hold for a
//! metaverse object and records the difference as a pending export. There
//! is at most one pending export per CSO; a new evaluation replaces it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use idsync_core::{ConnectedSystemId, MetaverseObjectId, MetaverseObjectTypeId, PendingExportId};
use idsync_db::models::{
    ActivityObjectError, AttributeChangeType, AttributeValue, ConnectedSystem,
    ConnectedSystemAttribute, ConnectedSystemObject, ConnectedSystemObjectStatus,
    ConnectedSystemObjectType, CsoReference, CsoValue, JoinType, MappingSource, MappingTarget,
    MetaverseObject, MetaverseObjectType, MetaverseValue, ObjectErrorType, PendingExport,
    PendingExportAttributeChange, PendingExportChangeType, SyncRule, SyncRuleDirection,
};
use idsync_db::SyncStore;

use crate::error::SyncResult;
use crate::rules::expression::{ExpressionContext, ExpressionEngine};
use crate::statistics::{Counter, StatisticsTracker};
use crate::values::clean_values;

/// What an evaluation did for one (rule, metaverse object) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDecision {
    /// A Create export for a newly provisioned CSO.
    Provisioned(PendingExportId),
    /// A pending export was written or replaced.
    Queued(PendingExportId),
    /// The target already matches; a stale pending export was removed.
    Withdrawn,
    /// The target already matches.
    NoChange,
    /// No target CSO and the rule does not provision.
    NotApplicable,
}

/// Desired values of one target attribute.
type DesiredValues<'a> = Vec<(&'a ConnectedSystemAttribute, Vec<CsoValue>)>;

/// Turns metaverse changes into pending exports.
pub struct ExportEvaluator {
    store: Arc<dyn SyncStore>,
    expressions: Arc<ExpressionEngine>,
    stats: Arc<StatisticsTracker>,
}

impl ExportEvaluator {
    pub fn new(
        store: Arc<dyn SyncStore>,
        expressions: Arc<ExpressionEngine>,
        stats: Arc<StatisticsTracker>,
    ) -> Self {
        Self {
            store,
            expressions,
            stats,
        }
    }

    /// Evaluate every enabled export rule for the given metaverse objects.
    ///
    /// Returns the number of pending exports written. Per-object problems
    /// are recorded on the statistics tracker.
    pub async fn evaluate(&self, mvo_ids: &[MetaverseObjectId]) -> SyncResult<u32> {
        if mvo_ids.is_empty() {
            return Ok(0);
        }
        let rules: Vec<SyncRule> = self
            .store
            .list_sync_rules(None)
            .await?
            .into_iter()
            .filter(|r| r.enabled && r.direction == SyncRuleDirection::Export)
            .collect();
        if rules.is_empty() {
            return Ok(0);
        }

        let mut systems: HashMap<ConnectedSystemId, ConnectedSystem> = HashMap::new();
        let mut mv_types: HashMap<MetaverseObjectTypeId, MetaverseObjectType> = HashMap::new();
        let mut written = 0;

        for mvo_id in mvo_ids {
            let Some(mvo) = self.store.get_mvo(*mvo_id).await? else {
                debug!(mvo_id = %mvo_id, "Metaverse object gone before export evaluation");
                continue;
            };

            for rule in rules
                .iter()
                .filter(|r| r.metaverse_object_type_id == mvo.object_type_id)
            {
                if !systems.contains_key(&rule.connected_system_id) {
                    match self.store.get_connected_system(rule.connected_system_id).await? {
                        Some(system) => {
                            systems.insert(system.id, system);
                        }
                        None => {
                            warn!(rule = %rule.name, "Export rule targets a missing connected system");
                            continue;
                        }
                    }
                }
                if !mv_types.contains_key(&rule.metaverse_object_type_id) {
                    match self
                        .store
                        .get_metaverse_object_type(rule.metaverse_object_type_id)
                        .await?
                    {
                        Some(mv_type) => {
                            mv_types.insert(mv_type.id, mv_type);
                        }
                        None => {
                            warn!(rule = %rule.name, "Export rule has a missing metaverse object type");
                            continue;
                        }
                    }
                }
                let (Some(system), Some(mv_type)) = (
                    systems.get(&rule.connected_system_id),
                    mv_types.get(&rule.metaverse_object_type_id),
                ) else {
                    continue;
                };

                match self.evaluate_rule(rule, system, mv_type, &mvo).await? {
                    Ok(ExportDecision::Provisioned(_) | ExportDecision::Queued(_)) => {
                        written += 1;
                        self.stats.record(Counter::PendingExportsCreated);
                    }
                    Ok(_) => {}
                    Err(object_error) => {
                        warn!(
                            mvo_id = %mvo.id,
                            rule = %rule.name,
                            error = %object_error.message,
                            "Export evaluation skipped object"
                        );
                        self.stats.record_object_error(object_error);
                    }
                }
            }
        }

        if written > 0 {
            info!(pending_exports = written, "Export evaluation complete");
        }
        Ok(written)
    }

    /// Evaluate one export rule for one metaverse object.
    pub async fn evaluate_rule(
        &self,
        rule: &SyncRule,
        system: &ConnectedSystem,
        mv_type: &MetaverseObjectType,
        mvo: &MetaverseObject,
    ) -> SyncResult<Result<ExportDecision, ActivityObjectError>> {
        let Some(cs_type) = system.object_type(rule.connected_system_object_type_id) else {
            return Ok(Err(ActivityObjectError::new(
                ObjectErrorType::Other,
                format!(
                    "Object type {} of rule '{}' is not part of connected system '{}'",
                    rule.connected_system_object_type_id, rule.name, system.name
                ),
            )));
        };
        let Some(external_id_attribute) = cs_type.external_id_attribute() else {
            return Ok(Err(ActivityObjectError::new(
                ObjectErrorType::MissingExternalId,
                format!("Object type '{}' has no external id attribute", cs_type.name),
            )
            .with_object_type(&cs_type.name)));
        };

        let target = self
            .store
            .list_csos_joined_to(mvo.id)
            .await?
            .into_iter()
            .find(|c| {
                c.connected_system_id == system.id
                    && c.object_type_id == cs_type.id
                    && !c.is_obsolete()
            });

        let desired = match self
            .desired_values(rule, system, cs_type, mv_type, mvo, target.as_ref())
            .await?
        {
            Ok(desired) => desired,
            Err(object_error) => return Ok(Err(object_error)),
        };

        match target {
            Some(cso) if cso.status == ConnectedSystemObjectStatus::PendingProvisioning => {
                let export = self.create_export(system, cs_type, external_id_attribute, &cso, &desired);
                self.store_export(export).await.map(Ok)
            }
            Some(cso) => self.update_export(system, cs_type, &cso, &desired).await.map(Ok),
            None if rule.provision_to_connected_system => {
                let mut cso =
                    ConnectedSystemObject::new(system.id, cs_type.id, external_id_attribute.id);
                cso.status = ConnectedSystemObjectStatus::PendingProvisioning;
                cso.metaverse_object_id = Some(mvo.id);
                cso.join_type = Some(JoinType::Provisioned);
                self.store.create_cso(cso.clone()).await?;

                let export = self.create_export(system, cs_type, external_id_attribute, &cso, &desired);
                let export_id = export.id;
                self.store.replace_pending_export(export).await?;
                info!(
                    mvo_id = %mvo.id,
                    cso_id = %cso.id,
                    system = %system.name,
                    "Provisioning new connected system object"
                );
                Ok(Ok(ExportDecision::Provisioned(export_id)))
            }
            None => Ok(Ok(ExportDecision::NotApplicable)),
        }
    }

    /// Desired values of every mapped target attribute. The first source of
    /// a mapping that yields a value wins.
    async fn desired_values<'a>(
        &self,
        rule: &SyncRule,
        system: &ConnectedSystem,
        cs_type: &'a ConnectedSystemObjectType,
        mv_type: &MetaverseObjectType,
        mvo: &MetaverseObject,
        target: Option<&ConnectedSystemObject>,
    ) -> SyncResult<Result<DesiredValues<'a>, ActivityObjectError>> {
        let mut context: Option<ExpressionContext> = None;
        let mut desired = Vec::new();

        for mapping in &rule.mappings {
            let MappingTarget::ConnectedSystemAttribute(target_id) = mapping.target else {
                continue;
            };
            let Some(attribute) = cs_type.attribute(target_id) else {
                continue;
            };

            let mut values = Vec::new();
            for source in mapping.ordered_sources() {
                let mut candidate = Vec::new();
                match &source.source {
                    MappingSource::MetaverseAttribute(id) => {
                        for row in mvo.values_of(*id) {
                            candidate.push(self.to_cso_value(system.id, row.value.clone()).await?);
                        }
                    }
                    MappingSource::Expression(expression) => {
                        let ctx = context.get_or_insert_with(|| {
                            let mut ctx = ExpressionContext::new();
                            ctx.add_mvo(mvo, mv_type);
                            if let Some(cso) = target {
                                ctx.add_cso(cso, cs_type);
                            }
                            ctx
                        });
                        let results =
                            match self.expressions.evaluate(expression, ctx, attribute.data_type) {
                                Ok(results) => results,
                                Err(e) => {
                                    return Ok(Err(ActivityObjectError::new(
                                        ObjectErrorType::Expression,
                                        format!("Mapping to '{}': {e}", attribute.name),
                                    )
                                    .with_object_type(&cs_type.name)));
                                }
                            };
                        for value in results {
                            let converted = match value {
                                AttributeValue::Reference(external_id) => Some(
                                    AttributeValue::Reference(
                                        self.cso_reference(system.id, external_id).await?,
                                    ),
                                ),
                                other => other.try_map_reference(|_| None),
                            };
                            candidate.push(converted);
                        }
                    }
                    MappingSource::ConnectedSystemAttribute(_) => continue,
                }

                let cleaned = clean_values(candidate);
                if !cleaned.is_empty() {
                    values = cleaned;
                    break;
                }
            }

            if !attribute.plurality.is_multi_valued() && values.len() > 1 {
                debug!(attribute = %attribute.name, count = values.len(), "Keeping first value of single-valued attribute");
                values.truncate(1);
            }
            desired.push((attribute, values));
        }

        Ok(Ok(desired))
    }

    /// Map a metaverse value to the target system. A reference becomes the
    /// external id of the CSO joined to the referenced metaverse object in
    /// that system; `None` when there is no such CSO yet.
    async fn to_cso_value(
        &self,
        system: ConnectedSystemId,
        value: MetaverseValue,
    ) -> SyncResult<Option<CsoValue>> {
        match value {
            AttributeValue::Reference(target_mvo) => {
                let target = self
                    .store
                    .list_csos_joined_to(target_mvo)
                    .await?
                    .into_iter()
                    .find(|c| c.connected_system_id == system && !c.is_obsolete());
                let reference = target.and_then(|cso| {
                    cso.external_id_key()
                        .map(|external_id| CsoReference::resolved(external_id, cso.id))
                });
                if reference.is_none() {
                    debug!(mvo_id = %target_mvo, "Referenced object has no exportable target yet");
                }
                Ok(reference.map(AttributeValue::Reference))
            }
            other => Ok(other.try_map_reference(|_| None)),
        }
    }

    async fn cso_reference(
        &self,
        system: ConnectedSystemId,
        external_id: String,
    ) -> SyncResult<CsoReference> {
        let candidates = self
            .store
            .find_csos_by_external_id_any_type(system, &external_id)
            .await?;
        Ok(match candidates.as_slice() {
            [target] => CsoReference::resolved(external_id, *target),
            _ => CsoReference::unresolved(external_id),
        })
    }

    fn create_export(
        &self,
        system: &ConnectedSystem,
        cs_type: &ConnectedSystemObjectType,
        external_id_attribute: &ConnectedSystemAttribute,
        cso: &ConnectedSystemObject,
        desired: &DesiredValues<'_>,
    ) -> PendingExport {
        let attribute_changes: Vec<_> = desired
            .iter()
            .flat_map(|(attribute, values)| {
                values
                    .iter()
                    .map(|value| change(attribute, AttributeChangeType::Add, value.clone()))
            })
            .collect();
        let external_id = desired
            .iter()
            .find(|(attribute, _)| attribute.id == external_id_attribute.id)
            .and_then(|(_, values)| values.first())
            .and_then(|value| value.external_id_key());

        new_export(
            system,
            cs_type,
            cso,
            external_id,
            PendingExportChangeType::Create,
            attribute_changes,
        )
    }

    async fn update_export(
        &self,
        system: &ConnectedSystem,
        cs_type: &ConnectedSystemObjectType,
        cso: &ConnectedSystemObject,
        desired: &DesiredValues<'_>,
    ) -> SyncResult<ExportDecision> {
        let mut attribute_changes = Vec::new();
        for (attribute, values) in desired {
            let current: Vec<&CsoValue> = cso.values_of(attribute.id).map(|v| &v.value).collect();
            for value in values {
                if !current.contains(&value) {
                    attribute_changes.push(change(attribute, AttributeChangeType::Add, value.clone()));
                }
            }
            for value in current {
                if !values.contains(value) {
                    attribute_changes.push(change(
                        attribute,
                        AttributeChangeType::Remove,
                        value.clone(),
                    ));
                }
            }
        }

        if attribute_changes.is_empty() {
            if let Some(stale) = self.store.get_pending_export_for_cso(cso.id).await? {
                self.store.delete_pending_export(stale.id).await?;
                debug!(cso_id = %cso.id, "Withdrew pending export, target already matches");
                return Ok(ExportDecision::Withdrawn);
            }
            return Ok(ExportDecision::NoChange);
        }

        let export = new_export(
            system,
            cs_type,
            cso,
            cso.external_id_key(),
            PendingExportChangeType::Update,
            attribute_changes,
        );
        self.store_export(export).await
    }

    /// Write an export unless an identical one is already pending.
    async fn store_export(&self, export: PendingExport) -> SyncResult<ExportDecision> {
        if let Some(existing) = self
            .store
            .get_pending_export_for_cso(export.connected_system_object_id)
            .await?
        {
            if existing.change_type == export.change_type
                && existing.external_id == export.external_id
                && existing.attribute_changes == export.attribute_changes
            {
                return Ok(ExportDecision::NoChange);
            }
        }

        let id = export.id;
        debug!(
            cso_id = %export.connected_system_object_id,
            change_type = %export.change_type,
            changes = export.attribute_changes.len(),
            "Queued pending export"
        );
        self.store.replace_pending_export(export).await?;
        Ok(ExportDecision::Queued(id))
    }
}

fn change(
    attribute: &ConnectedSystemAttribute,
    change_type: AttributeChangeType,
    value: CsoValue,
) -> PendingExportAttributeChange {
    PendingExportAttributeChange {
        attribute_id: attribute.id,
        attribute_name: attribute.name.clone(),
        change_type,
        value,
    }
}

fn new_export(
    system: &ConnectedSystem,
    cs_type: &ConnectedSystemObjectType,
    cso: &ConnectedSystemObject,
    external_id: Option<String>,
    change_type: PendingExportChangeType,
    attribute_changes: Vec<PendingExportAttributeChange>,
) -> PendingExport {
    PendingExport {
        id: PendingExportId::new(),
        connected_system_id: system.id,
        connected_system_object_id: cso.id,
        object_type_name: cs_type.name.clone(),
        external_id,
        change_type,
        attribute_changes,
        error_count: 0,
        last_error: None,
        created_at: Utc::now(),
        last_attempted_at: None,
    }
}
