//! Outbound changes waiting for an export run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_core::{AttributeId, ConnectedSystemId, ConnectedSystemObjectId, PendingExportId};

use super::attribute::CsoValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingExportChangeType {
    Create,
    Update,
}

impl PendingExportChangeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingExportChangeType::Create => "create",
            PendingExportChangeType::Update => "update",
        }
    }
}

impl fmt::Display for PendingExportChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeChangeType {
    Add,
    Remove,
}

/// Add or remove one value of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExportAttributeChange {
    pub attribute_id: AttributeId,
    /// Attribute name as the connector knows it.
    pub attribute_name: String,
    pub change_type: AttributeChangeType,
    pub value: CsoValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExport {
    pub id: PendingExportId,
    pub connected_system_id: ConnectedSystemId,
    pub connected_system_object_id: ConnectedSystemObjectId,
    /// Object type name as the connector knows it.
    pub object_type_name: String,
    /// External id of the target, when known.
    #[serde(default)]
    pub external_id: Option<String>,
    pub change_type: PendingExportChangeType,
    pub attribute_changes: Vec<PendingExportAttributeChange>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempted_at: Option<DateTime<Utc>>,
}

impl PendingExport {
    /// Values added to an attribute, by attribute name.
    pub fn added_values<'a>(&'a self, attribute_name: &'a str) -> impl Iterator<Item = &'a CsoValue> {
        self.attribute_changes
            .iter()
            .filter(move |c| {
                c.change_type == AttributeChangeType::Add
                    && c.attribute_name.eq_ignore_ascii_case(attribute_name)
            })
            .map(|c| &c.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttributeValue;

    #[test]
    fn test_added_values_filters_by_name_and_type() {
        let attr = AttributeId::new();
        let export = PendingExport {
            id: PendingExportId::new(),
            connected_system_id: ConnectedSystemId::new(),
            connected_system_object_id: ConnectedSystemObjectId::new(),
            object_type_name: "user".into(),
            external_id: None,
            change_type: PendingExportChangeType::Update,
            attribute_changes: vec![
                PendingExportAttributeChange {
                    attribute_id: attr,
                    attribute_name: "mail".into(),
                    change_type: AttributeChangeType::Add,
                    value: AttributeValue::Text("new@example.com".into()),
                },
                PendingExportAttributeChange {
                    attribute_id: attr,
                    attribute_name: "mail".into(),
                    change_type: AttributeChangeType::Remove,
                    value: AttributeValue::Text("old@example.com".into()),
                },
            ],
            error_count: 0,
            last_error: None,
            created_at: Utc::now(),
            last_attempted_at: None,
        };

        let added: Vec<_> = export.added_values("MAIL").collect();
        assert_eq!(added, vec![&AttributeValue::Text("new@example.com".into())]);
    }
}
