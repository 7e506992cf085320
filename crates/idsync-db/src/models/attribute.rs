//! Attribute schema and typed value model.
//!
//! The same value enum is used by connector import objects, connected system
//! objects and metaverse objects. Only the reference payload differs:
//!
//! - import objects carry the raw external id string ([`ImportValue`])
//! - connected system objects keep the external id and the resolved CSO id
//!   ([`CsoValue`])
//! - metaverse objects point at other metaverse objects ([`MetaverseValue`])

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use idsync_core::{AttributeValueId, ConnectedSystemObjectId, MetaverseObjectId};

/// Data type of an attribute, shared by connected system and metaverse schemas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeDataType {
    /// Type has not been chosen yet. Never valid in a mapping.
    #[default]
    NotSet,
    /// Text value.
    Text,
    /// 32-bit integer.
    Number,
    /// 64-bit integer.
    LongNumber,
    /// Date and time (UTC).
    DateTime,
    /// Raw bytes.
    Binary,
    /// Reference to another object.
    Reference,
    /// UUID/GUID value.
    Guid,
    /// Boolean value.
    Boolean,
}

impl AttributeDataType {
    /// Get the display name used in messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDataType::NotSet => "NotSet",
            AttributeDataType::Text => "Text",
            AttributeDataType::Number => "Number",
            AttributeDataType::LongNumber => "LongNumber",
            AttributeDataType::DateTime => "DateTime",
            AttributeDataType::Binary => "Binary",
            AttributeDataType::Reference => "Reference",
            AttributeDataType::Guid => "Guid",
            AttributeDataType::Boolean => "Boolean",
        }
    }
}

impl fmt::Display for AttributeDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AttributeDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notset" | "not_set" => Ok(Self::NotSet),
            "text" | "string" => Ok(Self::Text),
            "number" | "int" | "integer" => Ok(Self::Number),
            "longnumber" | "long_number" | "long" => Ok(Self::LongNumber),
            "datetime" | "date_time" => Ok(Self::DateTime),
            "binary" | "bytes" => Ok(Self::Binary),
            "reference" => Ok(Self::Reference),
            "guid" | "uuid" => Ok(Self::Guid),
            "boolean" | "bool" => Ok(Self::Boolean),
            _ => Err(format!("Unknown attribute data type: {s}")),
        }
    }
}

/// Whether an attribute holds one value or a set of values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributePlurality {
    /// At most one value.
    #[default]
    SingleValued,
    /// Any number of values.
    MultiValued,
}

impl AttributePlurality {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributePlurality::SingleValued => "single-valued",
            AttributePlurality::MultiValued => "multi-valued",
        }
    }

    #[must_use]
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, AttributePlurality::MultiValued)
    }
}

impl fmt::Display for AttributePlurality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One typed attribute value.
///
/// `R` is the reference payload, see the module documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue<R> {
    Text(String),
    Number(i32),
    LongNumber(i64),
    DateTime(DateTime<Utc>),
    Binary(Vec<u8>),
    Guid(Uuid),
    Boolean(bool),
    Reference(R),
}

impl<R> AttributeValue<R> {
    /// The schema type this value satisfies.
    #[must_use]
    pub fn data_type(&self) -> AttributeDataType {
        match self {
            AttributeValue::Text(_) => AttributeDataType::Text,
            AttributeValue::Number(_) => AttributeDataType::Number,
            AttributeValue::LongNumber(_) => AttributeDataType::LongNumber,
            AttributeValue::DateTime(_) => AttributeDataType::DateTime,
            AttributeValue::Binary(_) => AttributeDataType::Binary,
            AttributeValue::Guid(_) => AttributeDataType::Guid,
            AttributeValue::Boolean(_) => AttributeDataType::Boolean,
            AttributeValue::Reference(_) => AttributeDataType::Reference,
        }
    }

    /// Convert the reference payload, keeping scalar values as they are.
    ///
    /// Returns `None` when `f` cannot map the reference (e.g. the target is
    /// not joined yet).
    pub fn try_map_reference<S>(self, f: impl FnOnce(R) -> Option<S>) -> Option<AttributeValue<S>> {
        Some(match self {
            AttributeValue::Text(v) => AttributeValue::Text(v),
            AttributeValue::Number(v) => AttributeValue::Number(v),
            AttributeValue::LongNumber(v) => AttributeValue::LongNumber(v),
            AttributeValue::DateTime(v) => AttributeValue::DateTime(v),
            AttributeValue::Binary(v) => AttributeValue::Binary(v),
            AttributeValue::Guid(v) => AttributeValue::Guid(v),
            AttributeValue::Boolean(v) => AttributeValue::Boolean(v),
            AttributeValue::Reference(r) => AttributeValue::Reference(f(r)?),
        })
    }
}

impl<R: ReferenceKey> AttributeValue<R> {
    /// True for values the engine never stores: empty text, empty binary and
    /// references without a target.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Text(v) => v.is_empty(),
            AttributeValue::Binary(v) => v.is_empty(),
            AttributeValue::Reference(r) => r.reference_key().is_empty(),
            _ => false,
        }
    }

    /// Normalized string form used for external id matching.
    ///
    /// Binary values cannot act as external ids and return `None`.
    #[must_use]
    pub fn external_id_key(&self) -> Option<String> {
        let raw = match self {
            AttributeValue::Text(v) => v.clone(),
            AttributeValue::Number(v) => v.to_string(),
            AttributeValue::LongNumber(v) => v.to_string(),
            AttributeValue::DateTime(v) => v.to_rfc3339_opts(SecondsFormat::Millis, true),
            AttributeValue::Guid(v) => v.to_string(),
            AttributeValue::Boolean(v) => v.to_string(),
            AttributeValue::Reference(r) => r.reference_key(),
            AttributeValue::Binary(_) => return None,
        };
        Some(normalize_external_id(&raw))
    }
}

/// Normalize an external id string for lookups.
///
/// GUID-shaped strings compare case-insensitively and regardless of braces,
/// everything else compares exactly.
#[must_use]
pub fn normalize_external_id(value: &str) -> String {
    match Uuid::parse_str(value.trim_start_matches('{').trim_end_matches('}')) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => value.to_string(),
    }
}

/// Access to the string that identifies a reference target.
pub trait ReferenceKey {
    fn reference_key(&self) -> String;
}

impl ReferenceKey for String {
    fn reference_key(&self) -> String {
        self.clone()
    }
}

impl ReferenceKey for MetaverseObjectId {
    fn reference_key(&self) -> String {
        self.to_string()
    }
}

impl ReferenceKey for CsoReference {
    fn reference_key(&self) -> String {
        self.unresolved_reference_value.clone()
    }
}

/// A reference held by a connected system object.
///
/// The external id of the target is always kept, even once resolved, so the
/// reference can be re-resolved if the target is re-created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsoReference {
    /// External id of the target object as supplied by the connector.
    pub unresolved_reference_value: String,
    /// The target CSO, once it is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_value_id: Option<ConnectedSystemObjectId>,
}

impl CsoReference {
    pub fn unresolved(external_id: impl Into<String>) -> Self {
        Self {
            unresolved_reference_value: external_id.into(),
            reference_value_id: None,
        }
    }

    pub fn resolved(external_id: impl Into<String>, target: ConnectedSystemObjectId) -> Self {
        Self {
            unresolved_reference_value: external_id.into(),
            reference_value_id: Some(target),
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.reference_value_id.is_some()
    }
}

// Two references are the same value when they name the same external id;
// resolution state is bookkeeping, not part of the value.
impl PartialEq for CsoReference {
    fn eq(&self, other: &Self) -> bool {
        normalize_external_id(&self.unresolved_reference_value)
            == normalize_external_id(&other.unresolved_reference_value)
    }
}

/// Value supplied by a connector.
pub type ImportValue = AttributeValue<String>;

/// Value stored on a connected system object.
pub type CsoValue = AttributeValue<CsoReference>;

/// Value stored on a metaverse object.
pub type MetaverseValue = AttributeValue<MetaverseObjectId>;

/// One persisted value row. Multi-valued attributes are several rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAttributeValue<A, R> {
    pub id: AttributeValueId,
    pub attribute_id: A,
    pub value: AttributeValue<R>,
}

impl<A, R> StoredAttributeValue<A, R> {
    pub fn new(attribute_id: A, value: AttributeValue<R>) -> Self {
        Self {
            id: AttributeValueId::new(),
            attribute_id,
            value,
        }
    }
}

/// Atomic change to the value set of one attribute of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSetChange<A, R> {
    pub attribute_id: A,
    /// Rows to delete.
    pub removed: Vec<AttributeValueId>,
    /// Rows to insert.
    pub added: Vec<StoredAttributeValue<A, R>>,
}

impl<A, R> ValueSetChange<A, R> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_display_names() {
        assert_eq!(AttributeDataType::Text.to_string(), "Text");
        assert_eq!(AttributeDataType::Boolean.to_string(), "Boolean");
        assert_eq!(AttributeDataType::NotSet.to_string(), "NotSet");
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!(
            "string".parse::<AttributeDataType>().unwrap(),
            AttributeDataType::Text
        );
        assert_eq!(
            "LongNumber".parse::<AttributeDataType>().unwrap(),
            AttributeDataType::LongNumber
        );
        assert!("decimal".parse::<AttributeDataType>().is_err());
    }

    #[test]
    fn test_empty_values() {
        assert!(ImportValue::Text(String::new()).is_empty());
        assert!(ImportValue::Binary(vec![]).is_empty());
        assert!(ImportValue::Reference(String::new()).is_empty());
        assert!(!ImportValue::Text(" ".to_string()).is_empty());
        assert!(!ImportValue::Number(0).is_empty());
    }

    #[test]
    fn test_binary_equality_is_by_content() {
        let a: CsoValue = AttributeValue::Binary(vec![1, 2, 3]);
        let b: CsoValue = AttributeValue::Binary(vec![1, 2, 3]);
        let c: CsoValue = AttributeValue::Binary(vec![1, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_reference_equality_ignores_resolution() {
        let target = ConnectedSystemObjectId::new();
        let a: CsoValue = AttributeValue::Reference(CsoReference::unresolved("cn=a"));
        let b: CsoValue = AttributeValue::Reference(CsoReference::resolved("cn=a", target));
        assert_eq!(a, b);
    }

    #[test]
    fn test_guid_external_ids_normalize() {
        let upper = "{550E8400-E29B-41D4-A716-446655440000}";
        assert_eq!(
            normalize_external_id(upper),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(normalize_external_id("E1001"), "E1001");
    }

    #[test]
    fn test_external_id_key() {
        let guid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            ImportValue::Guid(guid).external_id_key().as_deref(),
            Some("550e8400-e29b-41d4-a716-446655440000")
        );
        assert_eq!(
            ImportValue::Number(42).external_id_key().as_deref(),
            Some("42")
        );
        assert!(ImportValue::Binary(vec![1]).external_id_key().is_none());
    }

    #[test]
    fn test_try_map_reference() {
        let mvo = MetaverseObjectId::new();
        let value: CsoValue = AttributeValue::Reference(CsoReference::unresolved("x"));
        let mapped: Option<MetaverseValue> = value.try_map_reference(|_| Some(mvo));
        assert_eq!(mapped, Some(AttributeValue::Reference(mvo)));

        let text: CsoValue = AttributeValue::Text("t".into());
        let mapped: Option<MetaverseValue> = text.try_map_reference(|_| None);
        assert_eq!(mapped, Some(AttributeValue::Text("t".into())));
    }
}
