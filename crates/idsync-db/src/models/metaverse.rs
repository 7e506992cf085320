//! The metaverse: the canonical identity store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use idsync_core::{MetaverseAttributeId, MetaverseObjectId, MetaverseObjectTypeId};

use super::attribute::{
    AttributeDataType, AttributePlurality, MetaverseValue, StoredAttributeValue, ValueSetChange,
};

/// One value row of a metaverse object.
pub type MetaverseAttributeValue = StoredAttributeValue<MetaverseAttributeId, MetaverseObjectId>;

/// A value set change of one metaverse attribute.
pub type MetaverseAttributeChange = ValueSetChange<MetaverseAttributeId, MetaverseObjectId>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaverseObjectType {
    pub id: MetaverseObjectTypeId,
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<MetaverseAttribute>,
}

impl MetaverseObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MetaverseObjectTypeId::new(),
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: MetaverseAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn attribute(&self, id: MetaverseAttributeId) -> Option<&MetaverseAttribute> {
        self.attributes.iter().find(|a| a.id == id)
    }

    #[must_use]
    pub fn attribute_by_name(&self, name: &str) -> Option<&MetaverseAttribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaverseAttribute {
    pub id: MetaverseAttributeId,
    pub name: String,
    pub data_type: AttributeDataType,
    pub plurality: AttributePlurality,
}

impl MetaverseAttribute {
    pub fn new(name: impl Into<String>, data_type: AttributeDataType) -> Self {
        Self {
            id: MetaverseAttributeId::new(),
            name: name.into(),
            data_type,
            plurality: AttributePlurality::SingleValued,
        }
    }

    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.plurality = AttributePlurality::MultiValued;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaverseObject {
    pub id: MetaverseObjectId,
    pub object_type_id: MetaverseObjectTypeId,
    #[serde(default)]
    pub attribute_values: Vec<MetaverseAttributeValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MetaverseObject {
    pub fn new(object_type_id: MetaverseObjectTypeId) -> Self {
        let now = Utc::now();
        Self {
            id: MetaverseObjectId::new(),
            object_type_id,
            attribute_values: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn values_of(
        &self,
        attribute_id: MetaverseAttributeId,
    ) -> impl Iterator<Item = &MetaverseAttributeValue> {
        self.attribute_values
            .iter()
            .filter(move |v| v.attribute_id == attribute_id)
    }

    #[must_use]
    pub fn has_value(&self, attribute_id: MetaverseAttributeId, value: &MetaverseValue) -> bool {
        self.values_of(attribute_id).any(|v| &v.value == value)
    }

    pub fn apply_changes(&mut self, changes: &[MetaverseAttributeChange]) {
        for change in changes {
            self.attribute_values
                .retain(|v| !change.removed.contains(&v.id));
            self.attribute_values.extend(change.added.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttributeValue;

    #[test]
    fn test_has_value() {
        let mail = MetaverseAttribute::new("mail", AttributeDataType::Text);
        let mut mvo = MetaverseObject::new(MetaverseObjectTypeId::new());
        mvo.attribute_values.push(StoredAttributeValue::new(
            mail.id,
            AttributeValue::Text("a@example.com".into()),
        ));

        assert!(mvo.has_value(mail.id, &AttributeValue::Text("a@example.com".into())));
        assert!(!mvo.has_value(mail.id, &AttributeValue::Text("b@example.com".into())));
    }

    #[test]
    fn test_attribute_by_name() {
        let person = MetaverseObjectType::new("person")
            .with_attribute(MetaverseAttribute::new("displayName", AttributeDataType::Text))
            .with_attribute(MetaverseAttribute::new("groups", AttributeDataType::Reference).multi_valued());

        assert!(person.attribute_by_name("DISPLAYNAME").is_some());
        assert!(person
            .attribute_by_name("groups")
            .unwrap()
            .plurality
            .is_multi_valued());
    }
}
