//! Sync rules and their attribute mappings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_core::{
    AttributeId, ConnectedSystemId, MetaverseAttributeId, MetaverseObjectTypeId, ObjectTypeId,
    SyncRuleId, SyncRuleMappingId,
};

/// Which way a sync rule moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRuleDirection {
    /// Connected system to metaverse.
    Import,
    /// Metaverse to connected system.
    Export,
}

impl SyncRuleDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRuleDirection::Import => "import",
            SyncRuleDirection::Export => "export",
        }
    }
}

impl fmt::Display for SyncRuleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRule {
    pub id: SyncRuleId,
    pub name: String,
    pub connected_system_id: ConnectedSystemId,
    pub connected_system_object_type_id: ObjectTypeId,
    pub metaverse_object_type_id: MetaverseObjectTypeId,
    pub direction: SyncRuleDirection,
    pub enabled: bool,
    /// Import rules: create a metaverse object when no join is found.
    #[serde(default)]
    pub projection_to_metaverse: bool,
    /// Export rules: create a CSO when the metaverse object has none.
    #[serde(default)]
    pub provision_to_connected_system: bool,
    #[serde(default)]
    pub object_matching_rules: Vec<ObjectMatchingRule>,
    #[serde(default)]
    pub mappings: Vec<SyncRuleMapping>,
    pub created_at: DateTime<Utc>,
}

impl SyncRule {
    pub fn new(
        name: impl Into<String>,
        connected_system_id: ConnectedSystemId,
        connected_system_object_type_id: ObjectTypeId,
        metaverse_object_type_id: MetaverseObjectTypeId,
        direction: SyncRuleDirection,
    ) -> Self {
        Self {
            id: SyncRuleId::new(),
            name: name.into(),
            connected_system_id,
            connected_system_object_type_id,
            metaverse_object_type_id,
            direction,
            enabled: true,
            projection_to_metaverse: false,
            provision_to_connected_system: false,
            object_matching_rules: Vec::new(),
            mappings: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn mapping(&self, id: SyncRuleMappingId) -> Option<&SyncRuleMapping> {
        self.mappings.iter().find(|m| m.id == id)
    }
}

/// Join condition: the CSO value equals the metaverse value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMatchingRule {
    pub connected_system_attribute_id: AttributeId,
    pub metaverse_attribute_id: MetaverseAttributeId,
}

/// The single attribute a mapping writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MappingTarget {
    MetaverseAttribute(MetaverseAttributeId),
    ConnectedSystemAttribute(AttributeId),
}

/// Where a mapping source reads its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MappingSource {
    ConnectedSystemAttribute(AttributeId),
    MetaverseAttribute(MetaverseAttributeId),
    Expression(String),
}

impl MappingSource {
    #[must_use]
    pub fn is_expression(&self) -> bool {
        matches!(self, MappingSource::Expression(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRuleMappingSource {
    /// Evaluation order, ascending.
    pub order: u32,
    pub source: MappingSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRuleMapping {
    pub id: SyncRuleMappingId,
    pub sync_rule_id: SyncRuleId,
    pub target: MappingTarget,
    pub sources: Vec<SyncRuleMappingSource>,
}

impl SyncRuleMapping {
    pub fn new(sync_rule_id: SyncRuleId, target: MappingTarget) -> Self {
        Self {
            id: SyncRuleMappingId::new(),
            sync_rule_id,
            target,
            sources: Vec::new(),
        }
    }

    /// Append a source after the existing ones.
    #[must_use]
    pub fn with_source(mut self, source: MappingSource) -> Self {
        let order = self.sources.iter().map(|s| s.order + 1).max().unwrap_or(0);
        self.sources.push(SyncRuleMappingSource { order, source });
        self
    }

    /// Sources in evaluation order.
    #[must_use]
    pub fn ordered_sources(&self) -> Vec<&SyncRuleMappingSource> {
        let mut sources: Vec<_> = self.sources.iter().collect();
        sources.sort_by_key(|s| s.order);
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_source_assigns_ascending_order() {
        let mapping = SyncRuleMapping::new(
            SyncRuleId::new(),
            MappingTarget::MetaverseAttribute(MetaverseAttributeId::new()),
        )
        .with_source(MappingSource::ConnectedSystemAttribute(AttributeId::new()))
        .with_source(MappingSource::Expression("\"fallback\"".into()));

        let orders: Vec<_> = mapping.sources.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_ordered_sources_sorts_by_order() {
        let mut mapping = SyncRuleMapping::new(
            SyncRuleId::new(),
            MappingTarget::ConnectedSystemAttribute(AttributeId::new()),
        );
        mapping.sources = vec![
            SyncRuleMappingSource {
                order: 5,
                source: MappingSource::Expression("b".into()),
            },
            SyncRuleMappingSource {
                order: 1,
                source: MappingSource::Expression("a".into()),
            },
        ];

        let ordered = mapping.ordered_sources();
        assert_eq!(ordered[0].source, MappingSource::Expression("a".into()));
    }

    #[test]
    fn test_mapping_target_serde() {
        let id = MetaverseAttributeId::new();
        let json = serde_json::to_value(MappingTarget::MetaverseAttribute(id)).unwrap();
        assert_eq!(json["kind"], "metaverse_attribute");
        assert_eq!(json["id"], id.to_string());
    }
}
