//! Connected system configuration and schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use idsync_core::{AttributeId, ConnectedSystemId, ObjectTypeId, PartitionId, RunProfileId};

use super::attribute::{AttributeDataType, AttributePlurality};

/// One external system that idsync imports from and exports to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSystem {
    pub id: ConnectedSystemId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Key into the connector registry (e.g. `"memory"`).
    pub connector_type: String,
    #[serde(default)]
    pub setting_values: HashMap<String, SettingValue>,
    #[serde(default)]
    pub object_types: Vec<ConnectedSystemObjectType>,
    #[serde(default)]
    pub run_profiles: Vec<RunProfile>,
    #[serde(default)]
    pub partitions: Vec<ConnectedSystemPartition>,
    /// Upper bound for concurrent export batches. `None` means sequential.
    #[serde(default)]
    pub max_export_parallelism: Option<u32>,
    /// Opaque connector state carried between runs (delta watermarks etc.).
    #[serde(default)]
    pub persisted_connector_data: Option<String>,
    /// End of the last completed synchronisation run.
    #[serde(default)]
    pub last_sync_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ConnectedSystem {
    pub fn new(name: impl Into<String>, connector_type: impl Into<String>) -> Self {
        Self {
            id: ConnectedSystemId::new(),
            name: name.into(),
            description: None,
            connector_type: connector_type.into(),
            setting_values: HashMap::new(),
            object_types: Vec::new(),
            run_profiles: Vec::new(),
            partitions: Vec::new(),
            max_export_parallelism: None,
            persisted_connector_data: None,
            last_sync_completed_at: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn object_type(&self, id: ObjectTypeId) -> Option<&ConnectedSystemObjectType> {
        self.object_types.iter().find(|t| t.id == id)
    }

    /// Case-insensitive lookup; connectors are not consistent about casing.
    #[must_use]
    pub fn object_type_by_name(&self, name: &str) -> Option<&ConnectedSystemObjectType> {
        self.object_types
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Find an attribute anywhere in the schema.
    #[must_use]
    pub fn attribute(&self, id: AttributeId) -> Option<&ConnectedSystemAttribute> {
        self.object_types.iter().find_map(|t| t.attribute(id))
    }

    #[must_use]
    pub fn run_profile(&self, id: RunProfileId) -> Option<&RunProfile> {
        self.run_profiles.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn partition(&self, id: PartitionId) -> Option<&ConnectedSystemPartition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    pub fn selected_object_types(&self) -> impl Iterator<Item = &ConnectedSystemObjectType> {
        self.object_types.iter().filter(|t| t.selected)
    }

    #[must_use]
    pub fn setting(&self, name: &str) -> Option<&SettingValue> {
        self.setting_values.get(name)
    }
}

/// An object class of a connected system (user, group, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSystemObjectType {
    pub id: ObjectTypeId,
    pub name: String,
    /// Only selected object types are imported and swept.
    pub selected: bool,
    #[serde(default)]
    pub attributes: Vec<ConnectedSystemAttribute>,
}

impl ConnectedSystemObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObjectTypeId::new(),
            name: name.into(),
            selected: true,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: ConnectedSystemAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn attribute(&self, id: AttributeId) -> Option<&ConnectedSystemAttribute> {
        self.attributes.iter().find(|a| a.id == id)
    }

    #[must_use]
    pub fn attribute_by_name(&self, name: &str) -> Option<&ConnectedSystemAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn external_id_attribute(&self) -> Option<&ConnectedSystemAttribute> {
        self.attributes.iter().find(|a| a.is_external_id)
    }
}

/// Attribute definition of a connected system object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSystemAttribute {
    pub id: AttributeId,
    pub name: String,
    pub data_type: AttributeDataType,
    pub plurality: AttributePlurality,
    #[serde(default)]
    pub is_external_id: bool,
    #[serde(default)]
    pub is_secondary_external_id: bool,
    #[serde(default = "default_true")]
    pub selected: bool,
}

fn default_true() -> bool {
    true
}

impl ConnectedSystemAttribute {
    pub fn new(name: impl Into<String>, data_type: AttributeDataType) -> Self {
        Self {
            id: AttributeId::new(),
            name: name.into(),
            data_type,
            plurality: AttributePlurality::SingleValued,
            is_external_id: false,
            is_secondary_external_id: false,
            selected: true,
        }
    }

    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.plurality = AttributePlurality::MultiValued;
        self
    }

    #[must_use]
    pub fn external_id(mut self) -> Self {
        self.is_external_id = true;
        self
    }

    #[must_use]
    pub fn secondary_external_id(mut self) -> Self {
        self.is_secondary_external_id = true;
        self
    }
}

/// A named unit of work against one connected system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunProfile {
    pub id: RunProfileId,
    pub name: String,
    pub run_type: RunType,
    #[serde(default)]
    pub partition_id: Option<PartitionId>,
    /// Import page size override.
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl RunProfile {
    pub fn new(name: impl Into<String>, run_type: RunType) -> Self {
        Self {
            id: RunProfileId::new(),
            name: name.into(),
            run_type,
            partition_id: None,
            page_size: None,
        }
    }
}

/// What a run profile does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    FullImport,
    DeltaImport,
    FullSynchronisation,
    DeltaSynchronisation,
    Export,
}

impl RunType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::FullImport => "full_import",
            RunType::DeltaImport => "delta_import",
            RunType::FullSynchronisation => "full_synchronisation",
            RunType::DeltaSynchronisation => "delta_synchronisation",
            RunType::Export => "export",
        }
    }

    #[must_use]
    pub fn is_import(&self) -> bool {
        matches!(self, RunType::FullImport | RunType::DeltaImport)
    }

    #[must_use]
    pub fn is_synchronisation(&self) -> bool {
        matches!(
            self,
            RunType::FullSynchronisation | RunType::DeltaSynchronisation
        )
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_import" => Ok(RunType::FullImport),
            "delta_import" => Ok(RunType::DeltaImport),
            "full_synchronisation" => Ok(RunType::FullSynchronisation),
            "delta_synchronisation" => Ok(RunType::DeltaSynchronisation),
            "export" => Ok(RunType::Export),
            _ => Err(format!("Invalid run type: {s}")),
        }
    }
}

/// A partition (naming context) of a connected system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSystemPartition {
    pub id: PartitionId,
    pub name: String,
    pub external_id: String,
    pub selected: bool,
    #[serde(default)]
    pub containers: Vec<ConnectedSystemContainer>,
}

/// A container inside a partition (an OU, a folder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedSystemContainer {
    pub external_id: String,
    pub name: String,
    pub selected: bool,
}

/// A connector setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Boolean(bool),
    Number(i64),
    Text(String),
}

impl SettingValue {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_system() -> ConnectedSystem {
        let mut system = ConnectedSystem::new("HR", "memory");
        system.object_types.push(
            ConnectedSystemObjectType::new("person")
                .with_attribute(
                    ConnectedSystemAttribute::new("employeeId", AttributeDataType::Text)
                        .external_id(),
                )
                .with_attribute(ConnectedSystemAttribute::new(
                    "mail",
                    AttributeDataType::Text,
                )),
        );
        system
    }

    #[test]
    fn test_object_type_lookup_is_case_insensitive() {
        let system = sample_system();
        assert!(system.object_type_by_name("PERSON").is_some());
        assert!(system.object_type_by_name("group").is_none());
    }

    #[test]
    fn test_external_id_attribute() {
        let system = sample_system();
        let person = system.object_type_by_name("person").unwrap();
        assert_eq!(person.external_id_attribute().unwrap().name, "employeeId");
    }

    #[test]
    fn test_attribute_lookup_across_types() {
        let system = sample_system();
        let mail = system.object_types[0].attribute_by_name("mail").unwrap();
        assert_eq!(system.attribute(mail.id).unwrap().name, "mail");
    }

    #[test]
    fn test_run_type_roundtrip() {
        for run_type in [
            RunType::FullImport,
            RunType::DeltaImport,
            RunType::FullSynchronisation,
            RunType::DeltaSynchronisation,
            RunType::Export,
        ] {
            assert_eq!(run_type.as_str().parse::<RunType>().unwrap(), run_type);
        }
        assert!(RunType::DeltaImport.is_import());
        assert!(!RunType::Export.is_synchronisation());
    }

    #[test]
    fn test_setting_value_untagged_serde() {
        let value: SettingValue = serde_json::from_str("true").unwrap();
        assert_eq!(value.as_bool(), Some(true));
        let value: SettingValue = serde_json::from_str("12").unwrap();
        assert_eq!(value.as_number(), Some(12));
        let value: SettingValue = serde_json::from_str("\"dc=example\"").unwrap();
        assert_eq!(value.as_text(), Some("dc=example"));
    }
}
