//! Import exchange types.

use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_db::models::{ImportValue, RunType};

/// Full or delta import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    Full,
    Delta,
}

impl ImportMode {
    /// The import mode of a run type, if it is an import.
    #[must_use]
    pub fn from_run_type(run_type: RunType) -> Option<Self> {
        match run_type {
            RunType::FullImport => Some(ImportMode::Full),
            RunType::DeltaImport => Some(ImportMode::Delta),
            _ => None,
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Full => write!(f, "full"),
            ImportMode::Delta => write!(f, "delta"),
        }
    }
}

/// What a connector reports for one object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportChangeType {
    /// Full import: the object exists, nothing more is claimed.
    #[default]
    NotSet,
    Create,
    Update,
    Delete,
}

/// One attribute of an imported object. Values may contain nulls, which the
/// engine discards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportObjectAttribute {
    pub name: String,
    pub values: Vec<Option<ImportValue>>,
}

impl ImportObjectAttribute {
    pub fn new(name: impl Into<String>, values: Vec<Option<ImportValue>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn single(name: impl Into<String>, value: ImportValue) -> Self {
        Self::new(name, vec![Some(value)])
    }

    pub fn null(name: impl Into<String>) -> Self {
        Self::new(name, vec![None])
    }
}

/// Transient snapshot of one object from a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportObject {
    pub change_type: ImportChangeType,
    pub object_type: String,
    pub attributes: Vec<ImportObjectAttribute>,
}

impl ImportObject {
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            change_type: ImportChangeType::NotSet,
            object_type: object_type.into(),
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_change_type(mut self, change_type: ImportChangeType) -> Self {
        self.change_type = change_type;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: ImportObjectAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Shorthand for a single text value.
    #[must_use]
    pub fn with_text(self, name: &str, value: &str) -> Self {
        self.with_attribute(ImportObjectAttribute::single(
            name,
            ImportValue::Text(value.to_string()),
        ))
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&ImportObjectAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// Selection of one object type to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportObjectTypeSelection {
    pub name: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub mode: ImportMode,
    pub object_types: Vec<ImportObjectTypeSelection>,
    #[serde(default)]
    pub partition: Option<String>,
    pub page_size: u32,
    /// Tokens returned by the previous page; empty for the first page.
    #[serde(default)]
    pub pagination_tokens: Vec<String>,
    /// Connector state saved by the previous run.
    #[serde(default)]
    pub persisted_connector_data: Option<String>,
}

/// One page of import results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportPage {
    pub objects: Vec<ImportObject>,
    pub more_to_import: bool,
    #[serde(default)]
    pub pagination_tokens: Vec<String>,
    /// New connector state to persist once the run completes.
    #[serde(default)]
    pub persisted_connector_data: Option<String>,
}
