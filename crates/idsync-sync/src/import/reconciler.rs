//! Import reconciliation.
//!
//! Turns connector import objects into create, update and obsolete
//! operations on connected system objects. Every change of one CSO goes to
//! the store in a single call; identical input produces no write at all.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use idsync_connector::import::{ImportChangeType, ImportObject};
use idsync_core::{AttributeId, ConnectedSystemObjectId};
use idsync_db::models::{
    ActivityObjectError, AttributeValue, ConnectedSystem, ConnectedSystemObject,
    ConnectedSystemObjectStatus, ConnectedSystemObjectType, ConnectedSystemObjectUpdate,
    CsoReference, CsoValue, ImportValue, ObjectErrorType, StoredAttributeValue,
};
use idsync_db::SyncStore;

use crate::error::SyncResult;
use crate::statistics::{Counter, StatisticsTracker};
use crate::values::{clean_values, coerce_import_value, diff_value_set};

/// What happened to one import object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Added(ConnectedSystemObjectId),
    Updated(ConnectedSystemObjectId),
    Unchanged(ConnectedSystemObjectId),
    Obsoleted(ConnectedSystemObjectId),
    /// A delete for an object that was never imported.
    Ignored,
}

/// The schema identity of an import object.
struct Identified<'a> {
    object_type: &'a ConnectedSystemObjectType,
    external_id_attribute_id: AttributeId,
    external_id: String,
}

/// An import object that could not be reconciled.
#[derive(Debug, Clone)]
pub struct ObjectFailure {
    pub error: ActivityObjectError,
    /// The existing CSO the object was matched to, if any. It still counts
    /// as seen by the run.
    pub seen: Option<ConnectedSystemObjectId>,
}

impl From<ActivityObjectError> for ObjectFailure {
    fn from(error: ActivityObjectError) -> Self {
        Self { error, seen: None }
    }
}

/// Cleaned values of the attributes an import object carries.
type CarriedValues = Vec<(AttributeId, Vec<CsoValue>)>;

/// Reconciles import pages of one connected system.
pub struct ImportReconciler {
    store: Arc<dyn SyncStore>,
    system: ConnectedSystem,
    stats: Arc<StatisticsTracker>,
    touched: HashSet<ConnectedSystemObjectId>,
}

impl ImportReconciler {
    pub fn new(
        store: Arc<dyn SyncStore>,
        system: ConnectedSystem,
        stats: Arc<StatisticsTracker>,
    ) -> Self {
        Self {
            store,
            system,
            stats,
            touched: HashSet::new(),
        }
    }

    /// CSOs seen by this run so far.
    #[must_use]
    pub fn touched(&self) -> &HashSet<ConnectedSystemObjectId> {
        &self.touched
    }

    /// Reconcile one page. Per-object failures are recorded and skipped;
    /// store failures abort.
    pub async fn process_page(&mut self, objects: Vec<ImportObject>) -> SyncResult<()> {
        debug!(
            system = %self.system.name,
            count = objects.len(),
            "Reconciling import page"
        );
        for object in objects {
            match self.process_object(&object).await? {
                Ok(outcome) => self.count(outcome),
                Err(ObjectFailure { error, seen }) => {
                    if let Some(id) = seen {
                        self.touched.insert(id);
                    }
                    warn!(
                        system = %self.system.name,
                        object_type = %object.object_type,
                        error_type = ?error.error_type,
                        error = %error.message,
                        "Skipping import object"
                    );
                    self.stats.record_object_error(error);
                }
            }
        }
        Ok(())
    }

    fn count(&mut self, outcome: ImportOutcome) {
        let (counter, id) = match outcome {
            ImportOutcome::Added(id) => (Counter::Added, id),
            ImportOutcome::Updated(id) => (Counter::Updated, id),
            ImportOutcome::Unchanged(id) => (Counter::Unchanged, id),
            ImportOutcome::Obsoleted(id) => (Counter::Obsoleted, id),
            ImportOutcome::Ignored => return,
        };
        self.stats.record(counter);
        self.touched.insert(id);
    }

    /// Reconcile a single import object.
    pub async fn process_object(
        &self,
        object: &ImportObject,
    ) -> SyncResult<Result<ImportOutcome, ObjectFailure>> {
        let identified = match self.identify(object) {
            Ok(identified) => identified,
            Err(error) => return Ok(Err(error.into())),
        };

        let existing = self
            .store
            .find_cso_by_external_id(
                self.system.id,
                identified.object_type.id,
                &identified.external_id,
            )
            .await?;

        if object.change_type == ImportChangeType::Delete {
            return match existing {
                Some(cso) if cso.is_obsolete() => Ok(Ok(ImportOutcome::Unchanged(cso.id))),
                Some(cso) => {
                    self.store.mark_csos_obsolete(&[cso.id]).await?;
                    debug!(cso_id = %cso.id, external_id = %identified.external_id, "Obsoleted deleted object");
                    Ok(Ok(ImportOutcome::Obsoleted(cso.id)))
                }
                None => {
                    debug!(external_id = %identified.external_id, "Delete for unknown object ignored");
                    Ok(Ok(ImportOutcome::Ignored))
                }
            };
        }

        let values = match self.carried_values(object, identified.object_type) {
            Ok(values) => values,
            Err(error) => {
                return Ok(Err(ObjectFailure {
                    error: error.with_external_id(identified.external_id),
                    seen: existing.map(|cso| cso.id),
                }))
            }
        };

        match existing {
            Some(cso) => self.update_existing(cso, values).await.map(Ok),
            None => self.create_new(identified, values).await,
        }
    }

    async fn create_new(
        &self,
        identified: Identified<'_>,
        values: CarriedValues,
    ) -> SyncResult<Result<ImportOutcome, ObjectFailure>> {
        let mut cso = ConnectedSystemObject::new(
            self.system.id,
            identified.object_type.id,
            identified.external_id_attribute_id,
        );
        for (attribute_id, values) in values {
            for value in values {
                cso.attribute_values
                    .push(StoredAttributeValue::new(attribute_id, value));
            }
        }
        self.resolve_new_references(&mut cso.attribute_values).await?;

        let id = cso.id;
        match self.store.create_cso(cso).await {
            Ok(()) => {
                debug!(cso_id = %id, external_id = %identified.external_id, "Created connected system object");
                Ok(Ok(ImportOutcome::Added(id)))
            }
            Err(e) if e.is_conflict() => Ok(Err(ActivityObjectError::new(
                ObjectErrorType::Other,
                e.to_string(),
            )
            .with_external_id(identified.external_id)
            .into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Diff the carried attributes against the stored rows. Attributes the
    /// object does not carry keep their values.
    async fn update_existing(
        &self,
        cso: ConnectedSystemObject,
        values: CarriedValues,
    ) -> SyncResult<ImportOutcome> {
        let mut update = ConnectedSystemObjectUpdate::default();
        if cso.status != ConnectedSystemObjectStatus::Normal {
            update.status = Some(ConnectedSystemObjectStatus::Normal);
        }
        for (attribute_id, desired) in values {
            let mut change = diff_value_set(attribute_id, cso.values_of(attribute_id), desired);
            if !change.is_empty() {
                self.resolve_new_references(&mut change.added).await?;
                update.attribute_changes.push(change);
            }
        }

        if update.is_empty() {
            return Ok(ImportOutcome::Unchanged(cso.id));
        }
        if cso.is_obsolete() {
            info!(cso_id = %cso.id, "Obsolete object seen again, returning to normal");
        }
        self.store.apply_cso_update(cso.id, update).await?;
        Ok(ImportOutcome::Updated(cso.id))
    }

    /// Point new reference rows at their target when it is already known.
    async fn resolve_new_references(
        &self,
        rows: &mut [StoredAttributeValue<AttributeId, CsoReference>],
    ) -> SyncResult<()> {
        for row in rows.iter_mut() {
            let AttributeValue::Reference(reference) = &mut row.value else {
                continue;
            };
            let candidates = self
                .store
                .find_csos_by_external_id_any_type(
                    self.system.id,
                    &reference.unresolved_reference_value,
                )
                .await?;
            if let [target] = candidates.as_slice() {
                reference.reference_value_id = Some(*target);
                self.stats.record(Counter::ReferencesResolved);
            }
        }
        Ok(())
    }

    /// Find the object type and external id of an import object.
    fn identify<'a>(&'a self, object: &ImportObject) -> Result<Identified<'a>, ActivityObjectError> {
        let object_type = self
            .system
            .object_type_by_name(&object.object_type)
            .filter(|t| t.selected)
            .ok_or_else(|| {
                ActivityObjectError::new(
                    ObjectErrorType::UnknownObjectType,
                    format!(
                        "Object type '{}' is not selected in connected system '{}'",
                        object.object_type, self.system.name
                    ),
                )
                .with_object_type(object.object_type.clone())
            })?;
        let external_id_attribute = object_type.external_id_attribute().ok_or_else(|| {
            ActivityObjectError::new(
                ObjectErrorType::MissingExternalId,
                format!("Object type '{}' has no external id attribute", object_type.name),
            )
            .with_object_type(object_type.name.clone())
        })?;

        let external_id = self
            .attribute_values(object, object_type, external_id_attribute.id)?
            .and_then(|values| values.first().and_then(|v| v.external_id_key()))
            .ok_or_else(|| {
                ActivityObjectError::new(
                    ObjectErrorType::MissingExternalId,
                    format!(
                        "Object has no value for external id attribute '{}'",
                        external_id_attribute.name
                    ),
                )
                .with_object_type(object_type.name.clone())
            })?;

        Ok(Identified {
            object_type,
            external_id_attribute_id: external_id_attribute.id,
            external_id,
        })
    }

    /// Cleaned values of every selected attribute the object carries. An
    /// attribute carried with only null or empty values yields an empty set.
    fn carried_values(
        &self,
        object: &ImportObject,
        object_type: &ConnectedSystemObjectType,
    ) -> Result<CarriedValues, ActivityObjectError> {
        let mut carried = Vec::new();
        for attribute in object_type.attributes.iter().filter(|a| a.selected) {
            if let Some(values) = self.attribute_values(object, object_type, attribute.id)? {
                carried.push((attribute.id, values));
            }
        }
        for unknown in object.attributes.iter().filter(|a| {
            object_type
                .attribute_by_name(&a.name)
                .map_or(true, |attr| !attr.selected)
        }) {
            debug!(
                object_type = %object_type.name,
                attribute = %unknown.name,
                "Ignoring attribute not in schema"
            );
        }
        Ok(carried)
    }

    /// Cleaned, type-checked values of one attribute of an import object;
    /// `None` when the object does not carry it.
    fn attribute_values(
        &self,
        object: &ImportObject,
        object_type: &ConnectedSystemObjectType,
        attribute_id: AttributeId,
    ) -> Result<Option<Vec<CsoValue>>, ActivityObjectError> {
        let Some(attribute) = object_type.attribute(attribute_id) else {
            return Ok(None);
        };
        let Some(imported) = object.attribute(&attribute.name) else {
            return Ok(None);
        };

        let mut coerced: Vec<Option<CsoValue>> = Vec::with_capacity(imported.values.len());
        for value in imported.values.iter().flatten() {
            match coerce_import_value(value.clone(), attribute.data_type) {
                Ok(value) => coerced.push(to_cso_value(value)),
                Err(value) => {
                    return Err(ActivityObjectError::new(
                        ObjectErrorType::TypeMismatch,
                        format!(
                            "Attribute '{}' expects {} but received {}",
                            attribute.name,
                            attribute.data_type,
                            value.data_type()
                        ),
                    )
                    .with_object_type(object_type.name.clone()))
                }
            }
        }

        let values = clean_values(coerced);
        if !attribute.plurality.is_multi_valued() && values.len() > 1 {
            return Err(ActivityObjectError::new(
                ObjectErrorType::TooManyValues,
                format!(
                    "Attribute '{}' is single-valued but received {} values",
                    attribute.name,
                    values.len()
                ),
            )
            .with_object_type(object_type.name.clone()));
        }
        Ok(Some(values))
    }

    /// Mark every CSO of a selected object type that this run did not see
    /// as obsolete. Only valid after a completed full import.
    pub async fn sweep_obsolete(&self) -> SyncResult<u32> {
        let mut stale = Vec::new();
        for object_type in self.system.selected_object_types() {
            let csos = self
                .store
                .list_csos(self.system.id, Some(object_type.id))
                .await?;
            stale.extend(
                csos.into_iter()
                    .filter(|c| c.status == ConnectedSystemObjectStatus::Normal)
                    .filter(|c| !self.touched.contains(&c.id))
                    .map(|c| c.id),
            );
        }
        if stale.is_empty() {
            return Ok(0);
        }
        let obsoleted = self.store.mark_csos_obsolete(&stale).await?;
        self.stats.add(Counter::Obsoleted, obsoleted);
        info!(
            system = %self.system.name,
            obsoleted,
            "Full import sweep marked unseen objects obsolete"
        );
        Ok(obsoleted)
    }
}

fn to_cso_value(value: ImportValue) -> Option<CsoValue> {
    value.try_map_reference(|external_id| Some(CsoReference::unresolved(external_id)))
}
