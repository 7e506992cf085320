//! Connector schema, partition and settings descriptions.

use serde::{Deserialize, Serialize};

use idsync_db::models::{
    AttributeDataType, AttributePlurality, ConnectedSystemAttribute, ConnectedSystemObjectType,
    SettingValue,
};

/// Schema reported by a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSchema {
    pub object_types: Vec<SchemaObjectType>,
}

impl ConnectorSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_object_type(mut self, object_type: SchemaObjectType) -> Self {
        self.object_types.push(object_type);
        self
    }

    #[must_use]
    pub fn object_type(&self, name: &str) -> Option<&SchemaObjectType> {
        self.object_types
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaObjectType {
    pub name: String,
    pub attributes: Vec<SchemaAttribute>,
    /// Attribute the connector suggests as external id.
    #[serde(default)]
    pub recommended_external_id: Option<String>,
}

impl SchemaObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            recommended_external_id: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: SchemaAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_external_id(mut self, name: impl Into<String>) -> Self {
        self.recommended_external_id = Some(name.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Build the connected system object type for this schema entry, with
    /// fresh ids and the recommended external id applied.
    #[must_use]
    pub fn to_object_type(&self) -> ConnectedSystemObjectType {
        let mut object_type = ConnectedSystemObjectType::new(self.name.clone());
        for attribute in &self.attributes {
            let mut cs_attribute =
                ConnectedSystemAttribute::new(attribute.name.clone(), attribute.data_type);
            cs_attribute.plurality = attribute.plurality;
            cs_attribute.is_external_id = self
                .recommended_external_id
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(&attribute.name));
            object_type.attributes.push(cs_attribute);
        }
        object_type
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    pub name: String,
    pub data_type: AttributeDataType,
    pub plurality: AttributePlurality,
    #[serde(default)]
    pub writable: bool,
}

impl SchemaAttribute {
    pub fn new(name: impl Into<String>, data_type: AttributeDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            plurality: AttributePlurality::SingleValued,
            writable: true,
        }
    }

    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.plurality = AttributePlurality::MultiValued;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

/// A partition reported by partition discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorPartition {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub containers: Vec<ConnectorContainer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorContainer {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub children: Vec<ConnectorContainer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingType {
    Text,
    Number,
    Boolean,
}

/// A setting the connector understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSettingDefinition {
    pub name: String,
    pub setting_type: SettingType,
    pub required: bool,
    #[serde(default)]
    pub default_value: Option<SettingValue>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ConnectorSettingDefinition {
    pub fn new(name: impl Into<String>, setting_type: SettingType) -> Self {
        Self {
            name: name.into(),
            setting_type,
            required: false,
            default_value: None,
            description: None,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: SettingValue) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether a supplied value has this setting's type.
    #[must_use]
    pub fn accepts(&self, value: &SettingValue) -> bool {
        matches!(
            (self.setting_type, value),
            (SettingType::Text, SettingValue::Text(_))
                | (SettingType::Number, SettingValue::Number(_))
                | (SettingType::Boolean, SettingValue::Boolean(_))
        )
    }
}

/// One problem found by settings validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingValidationFailure {
    pub setting: String,
    pub message: String,
}
