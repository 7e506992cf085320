//! Connected system objects (CSOs): the engine's copy of an object held in an
//! external system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_core::{
    AttributeId, AttributeValueId, ConnectedSystemId, ConnectedSystemObjectId, MetaverseObjectId,
    ObjectTypeId,
};

use super::attribute::{CsoReference, CsoValue, StoredAttributeValue, ValueSetChange};

/// One value row of a CSO.
pub type ConnectedSystemObjectAttributeValue = StoredAttributeValue<AttributeId, CsoReference>;

/// A value set change of one CSO attribute.
pub type CsoAttributeChange = ValueSetChange<AttributeId, CsoReference>;

/// Lifecycle status of a CSO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectedSystemObjectStatus {
    /// Present in the connected system.
    #[default]
    Normal,
    /// No longer seen by a full import, or deleted by a delta import.
    Obsolete,
    /// Created by the export engine, not yet confirmed by the connector.
    PendingProvisioning,
}

impl ConnectedSystemObjectStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectedSystemObjectStatus::Normal => "normal",
            ConnectedSystemObjectStatus::Obsolete => "obsolete",
            ConnectedSystemObjectStatus::PendingProvisioning => "pending_provisioning",
        }
    }
}

impl fmt::Display for ConnectedSystemObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a CSO came to be joined to its metaverse object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// The metaverse object was created from this CSO.
    Projected,
    /// Matched to an existing metaverse object.
    Joined,
    /// Created by the export engine for an existing metaverse object.
    Provisioned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSystemObject {
    pub id: ConnectedSystemObjectId,
    pub connected_system_id: ConnectedSystemId,
    pub object_type_id: ObjectTypeId,
    /// Attribute whose value identifies this object in the connected system.
    pub external_id_attribute_id: AttributeId,
    pub status: ConnectedSystemObjectStatus,
    #[serde(default)]
    pub metaverse_object_id: Option<MetaverseObjectId>,
    #[serde(default)]
    pub join_type: Option<JoinType>,
    #[serde(default)]
    pub attribute_values: Vec<ConnectedSystemObjectAttributeValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectedSystemObject {
    pub fn new(
        connected_system_id: ConnectedSystemId,
        object_type_id: ObjectTypeId,
        external_id_attribute_id: AttributeId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectedSystemObjectId::new(),
            connected_system_id,
            object_type_id,
            external_id_attribute_id,
            status: ConnectedSystemObjectStatus::Normal,
            metaverse_object_id: None,
            join_type: None,
            attribute_values: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// All value rows of one attribute.
    pub fn values_of(
        &self,
        attribute_id: AttributeId,
    ) -> impl Iterator<Item = &ConnectedSystemObjectAttributeValue> {
        self.attribute_values
            .iter()
            .filter(move |v| v.attribute_id == attribute_id)
    }

    #[must_use]
    pub fn first_value(&self, attribute_id: AttributeId) -> Option<&CsoValue> {
        self.values_of(attribute_id).next().map(|v| &v.value)
    }

    /// Normalized external id, if the object has one yet.
    #[must_use]
    pub fn external_id_key(&self) -> Option<String> {
        self.first_value(self.external_id_attribute_id)
            .and_then(|v| v.external_id_key())
    }

    #[must_use]
    pub fn is_obsolete(&self) -> bool {
        self.status == ConnectedSystemObjectStatus::Obsolete
    }

    /// Apply value set changes in memory. Stores use this for their own
    /// bookkeeping; callers go through the store.
    pub fn apply_changes(&mut self, changes: &[CsoAttributeChange]) {
        for change in changes {
            self.attribute_values
                .retain(|v| !change.removed.contains(&v.id));
            self.attribute_values.extend(change.added.iter().cloned());
        }
    }
}

/// One atomic update of a CSO, applied by a single store call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectedSystemObjectUpdate {
    pub status: Option<ConnectedSystemObjectStatus>,
    pub attribute_changes: Vec<CsoAttributeChange>,
}

impl ConnectedSystemObjectUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.attribute_changes.iter().all(ValueSetChange::is_empty)
    }
}

/// A reference value row still waiting for its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub connected_system_object_id: ConnectedSystemObjectId,
    pub attribute_value_id: AttributeValueId,
    pub attribute_id: AttributeId,
    pub unresolved_reference_value: String,
}

/// Resolution of one reference value row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceResolution {
    pub attribute_value_id: AttributeValueId,
    pub target: ConnectedSystemObjectId,
}
