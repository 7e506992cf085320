//! Synchronisation run: attribute flow from connected system objects into
//! the metaverse.
//!
//! Each CSO is processed on its own. Obsolete CSOs are disconnected,
//! unjoined CSOs are joined or projected, and import mappings replace the
//! value sets of metaverse attributes. Changed metaverse objects are handed
//! to the export evaluator at the end of the run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use idsync_core::{ConnectedSystemId, MetaverseObjectId, MetaverseObjectTypeId};
use idsync_db::models::{
    ActivityObjectError, AttributeValue, ConnectedSystem, ConnectedSystemObject,
    ConnectedSystemObjectStatus, ConnectedSystemObjectType, CsoValue, JoinType, MappingSource,
    MappingTarget, MetaverseObject, MetaverseObjectType, MetaverseValue, ObjectErrorType,
    SyncRule, SyncRuleDirection,
};
use idsync_db::SyncStore;

use crate::error::{SyncError, SyncResult};
use crate::export::ExportEvaluator;
use crate::rules::expression::{ExpressionContext, ExpressionEngine};
use crate::statistics::{Counter, StatisticsTracker};
use crate::values::{clean_values, diff_value_set};

/// Which CSOs a run looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Every CSO of the system.
    Full,
    /// CSOs changed since the last completed synchronisation.
    Delta,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Delta => write!(f, "delta"),
        }
    }
}

/// What happened to one CSO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// No import rule covers the object type, or nothing to join to.
    Skipped,
    Disconnected(MetaverseObjectId),
    /// Joined or projected now, or already joined; `changed` tells whether
    /// the metaverse object changed.
    Synchronised {
        mvo: MetaverseObjectId,
        changed: bool,
    },
}

/// Summary of a finished synchronisation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunSummary {
    pub processed: u32,
    pub changed_mvos: u32,
    pub pending_exports: u32,
}

/// One full or delta synchronisation of a connected system.
pub struct SyncRun {
    store: Arc<dyn SyncStore>,
    system: ConnectedSystem,
    mode: SyncMode,
    expressions: Arc<ExpressionEngine>,
    stats: Arc<StatisticsTracker>,
}

impl SyncRun {
    pub fn new(
        store: Arc<dyn SyncStore>,
        system: ConnectedSystem,
        mode: SyncMode,
        expressions: Arc<ExpressionEngine>,
        stats: Arc<StatisticsTracker>,
    ) -> Self {
        Self {
            store,
            system,
            mode,
            expressions,
            stats,
        }
    }

    /// Execute the run.
    #[instrument(skip(self, cancel), fields(system = %self.system.name, mode = %self.mode))]
    pub async fn execute(&self, cancel: &CancellationToken) -> SyncResult<SyncRunSummary> {
        let started_at = Utc::now();
        let rules: Vec<SyncRule> = self
            .store
            .list_sync_rules(Some(self.system.id))
            .await?
            .into_iter()
            .filter(|r| r.enabled && r.direction == SyncRuleDirection::Import)
            .collect();

        let csos = match (self.mode, self.system.last_sync_completed_at) {
            (SyncMode::Delta, Some(since)) => {
                self.store
                    .list_csos_updated_since(self.system.id, since)
                    .await?
            }
            _ => self.store.list_csos(self.system.id, None).await?,
        };
        debug!(csos = csos.len(), rules = rules.len(), "Starting synchronisation");

        let mut mv_types: HashMap<MetaverseObjectTypeId, MetaverseObjectType> = HashMap::new();
        for rule in &rules {
            if mv_types.contains_key(&rule.metaverse_object_type_id) {
                continue;
            }
            if let Some(mv_type) = self
                .store
                .get_metaverse_object_type(rule.metaverse_object_type_id)
                .await?
            {
                mv_types.insert(mv_type.id, mv_type);
            }
        }

        let mut summary = SyncRunSummary::default();
        let mut changed: Vec<MetaverseObjectId> = Vec::new();
        let mut seen: HashSet<MetaverseObjectId> = HashSet::new();

        for cso in &csos {
            if cancel.is_cancelled() {
                info!(processed = summary.processed, "Synchronisation cancelled");
                return Err(SyncError::Cancelled);
            }
            summary.processed += 1;

            match self.process_cso(cso, &rules, &mv_types).await? {
                Ok(FlowOutcome::Synchronised { mvo, changed: true })
                | Ok(FlowOutcome::Disconnected(mvo)) => {
                    if seen.insert(mvo) {
                        changed.push(mvo);
                    }
                }
                Ok(FlowOutcome::Synchronised { .. }) => self.stats.record(Counter::Unchanged),
                Ok(FlowOutcome::Skipped) => {}
                Err(object_error) => {
                    warn!(
                        cso_id = %cso.id,
                        error = %object_error.message,
                        "Synchronisation skipped object"
                    );
                    self.stats.record_object_error(object_error);
                }
            }
        }
        summary.changed_mvos = changed.len() as u32;

        let exports = ExportEvaluator::new(
            self.store.clone(),
            self.expressions.clone(),
            self.stats.clone(),
        );
        summary.pending_exports = exports.evaluate(&changed).await?;

        self.store
            .update_last_sync_completed_at(self.system.id, started_at)
            .await?;

        info!(
            processed = summary.processed,
            changed_mvos = summary.changed_mvos,
            pending_exports = summary.pending_exports,
            "Synchronisation complete"
        );
        Ok(summary)
    }

    /// Synchronise one CSO.
    pub async fn process_cso(
        &self,
        cso: &ConnectedSystemObject,
        rules: &[SyncRule],
        mv_types: &HashMap<MetaverseObjectTypeId, MetaverseObjectType>,
    ) -> SyncResult<Result<FlowOutcome, ActivityObjectError>> {
        match cso.status {
            ConnectedSystemObjectStatus::PendingProvisioning => return Ok(Ok(FlowOutcome::Skipped)),
            ConnectedSystemObjectStatus::Obsolete => {
                let Some(mvo) = cso.metaverse_object_id else {
                    return Ok(Ok(FlowOutcome::Skipped));
                };
                self.store.set_cso_join(cso.id, None, None).await?;
                self.stats.record(Counter::Disconnected);
                debug!(cso_id = %cso.id, mvo_id = %mvo, "Disconnected obsolete object");
                return Ok(Ok(FlowOutcome::Disconnected(mvo)));
            }
            ConnectedSystemObjectStatus::Normal => {}
        }

        let Some(cs_type) = self.system.object_type(cso.object_type_id) else {
            return Ok(Ok(FlowOutcome::Skipped));
        };
        let type_rules: Vec<&SyncRule> = rules
            .iter()
            .filter(|r| r.connected_system_object_type_id == cso.object_type_id)
            .collect();
        if type_rules.is_empty() {
            return Ok(Ok(FlowOutcome::Skipped));
        }

        let (mvo, joined_now) = match cso.metaverse_object_id {
            Some(id) => match self.store.get_mvo(id).await? {
                Some(mvo) => (mvo, false),
                None => {
                    warn!(cso_id = %cso.id, mvo_id = %id, "Joined metaverse object is missing");
                    self.store.set_cso_join(cso.id, None, None).await?;
                    return Ok(Ok(FlowOutcome::Skipped));
                }
            },
            None => match self.join_or_project(cso, cs_type, &type_rules).await? {
                Ok(Some(mvo)) => (mvo, true),
                Ok(None) => return Ok(Ok(FlowOutcome::Skipped)),
                Err(object_error) => return Ok(Err(object_error)),
            },
        };

        let Some(mv_type) = mv_types.get(&mvo.object_type_id) else {
            return Ok(Ok(FlowOutcome::Synchronised {
                mvo: mvo.id,
                changed: joined_now,
            }));
        };

        let mut changes = Vec::new();
        let mut context: Option<ExpressionContext> = None;
        for rule in type_rules
            .iter()
            .filter(|r| r.metaverse_object_type_id == mvo.object_type_id)
        {
            for mapping in &rule.mappings {
                let MappingTarget::MetaverseAttribute(target_id) = mapping.target else {
                    continue;
                };
                let Some(target) = mv_type.attribute(target_id) else {
                    continue;
                };

                let mut values: Vec<MetaverseValue> = Vec::new();
                for source in mapping.ordered_sources() {
                    let mut candidate: Vec<Option<MetaverseValue>> = Vec::new();
                    match &source.source {
                        MappingSource::ConnectedSystemAttribute(id) => {
                            for row in cso.values_of(*id) {
                                candidate.push(self.to_metaverse_value(row.value.clone()).await?);
                            }
                        }
                        MappingSource::Expression(expression) => {
                            let ctx = context.get_or_insert_with(|| {
                                let mut ctx = ExpressionContext::new();
                                ctx.add_cso(cso, cs_type);
                                ctx.add_mvo(&mvo, mv_type);
                                ctx
                            });
                            let results = match self.expressions.evaluate(
                                expression,
                                ctx,
                                target.data_type,
                            ) {
                                Ok(results) => results,
                                Err(e) => {
                                    return Ok(Err(ActivityObjectError::new(
                                        ObjectErrorType::Expression,
                                        format!("Mapping to '{}': {e}", target.name),
                                    )
                                    .with_object_type(&cs_type.name)
                                    .with_cso(cso.id)));
                                }
                            };
                            for value in results {
                                let converted = match value {
                                    AttributeValue::Reference(external_id) => self
                                        .metaverse_reference(self.system.id, &external_id)
                                        .await?
                                        .map(AttributeValue::Reference),
                                    other => other.try_map_reference(|_| None),
                                };
                                candidate.push(converted);
                            }
                        }
                        MappingSource::MetaverseAttribute(_) => continue,
                    }

                    let cleaned = clean_values(candidate);
                    if !cleaned.is_empty() {
                        values = cleaned;
                        break;
                    }
                }

                if !target.plurality.is_multi_valued() && values.len() > 1 {
                    values.truncate(1);
                }
                let change = diff_value_set(target.id, mvo.values_of(target.id), values);
                if !change.is_empty() {
                    changes.push(change);
                }
            }
        }

        let flowed = changes.len() as u32;
        if flowed > 0 {
            self.store.apply_mvo_changes(mvo.id, changes).await?;
            self.stats.add(Counter::AttributeFlows, flowed);
            debug!(cso_id = %cso.id, mvo_id = %mvo.id, attributes = flowed, "Attribute flow applied");
        }

        Ok(Ok(FlowOutcome::Synchronised {
            mvo: mvo.id,
            changed: joined_now || flowed > 0,
        }))
    }

    /// Join an unjoined CSO through the matching rules of its sync rules, or
    /// project it when a rule projects.
    async fn join_or_project(
        &self,
        cso: &ConnectedSystemObject,
        cs_type: &ConnectedSystemObjectType,
        rules: &[&SyncRule],
    ) -> SyncResult<Result<Option<MetaverseObject>, ActivityObjectError>> {
        for rule in rules {
            let mut candidates: Vec<MetaverseObject> = Vec::new();
            for matching in &rule.object_matching_rules {
                let Some(value) = cso
                    .first_value(matching.connected_system_attribute_id)
                    .and_then(|v| v.clone().try_map_reference(|_| None::<MetaverseObjectId>))
                else {
                    continue;
                };
                for mvo in self
                    .store
                    .find_mvos_by_value(
                        rule.metaverse_object_type_id,
                        matching.metaverse_attribute_id,
                        &value,
                    )
                    .await?
                {
                    if !candidates.iter().any(|c| c.id == mvo.id) {
                        candidates.push(mvo);
                    }
                }
            }

            match candidates.len() {
                0 => {}
                1 => {
                    let mvo = candidates.remove(0);
                    self.store
                        .set_cso_join(cso.id, Some(mvo.id), Some(JoinType::Joined))
                        .await?;
                    self.stats.record(Counter::Joined);
                    debug!(cso_id = %cso.id, mvo_id = %mvo.id, rule = %rule.name, "Joined object");
                    return Ok(Ok(Some(mvo)));
                }
                n => {
                    let mut object_error = ActivityObjectError::new(
                        ObjectErrorType::AmbiguousMatch,
                        format!("{n} metaverse objects match under rule '{}'", rule.name),
                    )
                    .with_object_type(&cs_type.name)
                    .with_cso(cso.id);
                    if let Some(external_id) = cso.external_id_key() {
                        object_error = object_error.with_external_id(external_id);
                    }
                    return Ok(Err(object_error));
                }
            }
        }

        let Some(rule) = rules.iter().find(|r| r.projection_to_metaverse) else {
            return Ok(Ok(None));
        };
        let mvo = MetaverseObject::new(rule.metaverse_object_type_id);
        self.store.create_mvo(mvo.clone()).await?;
        self.store
            .set_cso_join(cso.id, Some(mvo.id), Some(JoinType::Projected))
            .await?;
        self.stats.record(Counter::Projected);
        debug!(cso_id = %cso.id, mvo_id = %mvo.id, rule = %rule.name, "Projected object");
        Ok(Ok(Some(mvo)))
    }

    /// Map a CSO value into the metaverse. A reference flows through the
    /// join of its target; `None` when the target is unresolved or unjoined.
    async fn to_metaverse_value(&self, value: CsoValue) -> SyncResult<Option<MetaverseValue>> {
        match value {
            AttributeValue::Reference(reference) => {
                let Some(target) = reference.reference_value_id else {
                    return Ok(None);
                };
                Ok(self
                    .store
                    .get_cso(target)
                    .await?
                    .and_then(|cso| cso.metaverse_object_id)
                    .map(AttributeValue::Reference))
            }
            other => Ok(other.try_map_reference(|_| None)),
        }
    }

    async fn metaverse_reference(
        &self,
        system: ConnectedSystemId,
        external_id: &str,
    ) -> SyncResult<Option<MetaverseObjectId>> {
        let candidates = self
            .store
            .find_csos_by_external_id_any_type(system, external_id)
            .await?;
        let [target] = candidates.as_slice() else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_cso(*target)
            .await?
            .and_then(|cso| cso.metaverse_object_id))
    }
}
