//! Sync rule mapping validation.
//!
//! Every mapping is checked the same way no matter who submits it. Attribute
//! sources must match the target exactly: same data type, neither side
//! `NotSet`, and never multi-valued into single-valued. Expression sources
//! skip the type checks but must compile.

use idsync_core::{AttributeId, MetaverseAttributeId};
use idsync_db::models::{
    AttributeDataType, AttributePlurality, ConnectedSystemObjectType, MappingSource,
    MappingTarget, MetaverseObjectType, SyncRule, SyncRuleDirection, SyncRuleMapping,
};

use crate::error::{SyncError, SyncResult};
use crate::rules::expression::ExpressionEngine;

/// Name, type and plurality of one side of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeShape<'a> {
    pub name: &'a str,
    pub data_type: AttributeDataType,
    pub plurality: AttributePlurality,
}

/// Check that a source attribute can feed a target attribute.
///
/// `NotSet` is checked first, then the data type, then plurality.
pub fn check_compatibility(source: AttributeShape<'_>, target: AttributeShape<'_>) -> SyncResult<()> {
    for side in [source, target] {
        if side.data_type == AttributeDataType::NotSet {
            return Err(SyncError::mapping_validation(format!(
                "Attribute '{}' has no data type (NotSet) and cannot be mapped",
                side.name
            )));
        }
    }

    if source.data_type != target.data_type {
        return Err(SyncError::mapping_validation(format!(
            "Source attribute '{}' ({}) is not compatible with target attribute '{}' ({})",
            source.name, source.data_type, target.name, target.data_type
        )));
    }

    if source.plurality.is_multi_valued() && !target.plurality.is_multi_valued() {
        return Err(SyncError::mapping_validation(format!(
            "Cannot map multi-valued attribute '{}' to single-valued attribute '{}'",
            source.name, target.name
        )));
    }

    Ok(())
}

/// Schemas a mapping of one rule is checked against.
pub struct MappingSchemas<'a> {
    pub connected_system_type: &'a ConnectedSystemObjectType,
    pub metaverse_type: &'a MetaverseObjectType,
}

impl<'a> MappingSchemas<'a> {
    fn cs_attribute(&self, id: AttributeId) -> Option<AttributeShape<'a>> {
        self.connected_system_type
            .attribute(id)
            .map(|a| AttributeShape {
                name: &a.name,
                data_type: a.data_type,
                plurality: a.plurality,
            })
    }

    fn mv_attribute(&self, id: MetaverseAttributeId) -> Option<AttributeShape<'a>> {
        self.metaverse_type.attribute(id).map(|a| AttributeShape {
            name: &a.name,
            data_type: a.data_type,
            plurality: a.plurality,
        })
    }
}

/// Validate one mapping of `rule`.
pub fn validate_mapping(
    rule: &SyncRule,
    mapping: &SyncRuleMapping,
    schemas: &MappingSchemas<'_>,
    expressions: &ExpressionEngine,
) -> SyncResult<()> {
    if mapping.sync_rule_id != rule.id {
        return Err(SyncError::mapping_validation(format!(
            "Mapping {} does not belong to sync rule '{}'",
            mapping.id, rule.name
        )));
    }
    if mapping.sources.is_empty() {
        return Err(SyncError::mapping_validation(
            "A mapping needs at least one source",
        ));
    }

    let target = match (rule.direction, mapping.target) {
        (SyncRuleDirection::Import, MappingTarget::MetaverseAttribute(id)) => {
            schemas.mv_attribute(id).ok_or_else(|| {
                SyncError::mapping_validation(format!(
                    "Target attribute {id} is not an attribute of metaverse object type '{}'",
                    schemas.metaverse_type.name
                ))
            })?
        }
        (SyncRuleDirection::Export, MappingTarget::ConnectedSystemAttribute(id)) => {
            schemas.cs_attribute(id).ok_or_else(|| {
                SyncError::mapping_validation(format!(
                    "Target attribute {id} is not an attribute of object type '{}'",
                    schemas.connected_system_type.name
                ))
            })?
        }
        (direction, _) => {
            return Err(SyncError::mapping_validation(format!(
                "Target of a mapping on an {direction} rule must be a {} attribute",
                target_kind(direction)
            )))
        }
    };

    for source in mapping.ordered_sources() {
        let shape = match (&source.source, rule.direction) {
            (MappingSource::Expression(expression), _) => {
                expressions.compile(expression)?;
                continue;
            }
            (MappingSource::ConnectedSystemAttribute(id), SyncRuleDirection::Import) => {
                schemas.cs_attribute(*id).ok_or_else(|| {
                    SyncError::mapping_validation(format!(
                        "Source attribute {id} is not an attribute of object type '{}'",
                        schemas.connected_system_type.name
                    ))
                })?
            }
            (MappingSource::MetaverseAttribute(id), SyncRuleDirection::Export) => {
                schemas.mv_attribute(*id).ok_or_else(|| {
                    SyncError::mapping_validation(format!(
                        "Source attribute {id} is not an attribute of metaverse object type '{}'",
                        schemas.metaverse_type.name
                    ))
                })?
            }
            (_, direction) => {
                return Err(SyncError::mapping_validation(format!(
                    "Sources of a mapping on an {direction} rule must be {} attributes or expressions",
                    source_kind(direction)
                )))
            }
        };
        check_compatibility(shape, target)?;
    }

    Ok(())
}

fn source_kind(direction: SyncRuleDirection) -> &'static str {
    match direction {
        SyncRuleDirection::Import => "connected system",
        SyncRuleDirection::Export => "metaverse",
    }
}

fn target_kind(direction: SyncRuleDirection) -> &'static str {
    match direction {
        SyncRuleDirection::Import => "metaverse",
        SyncRuleDirection::Export => "connected system",
    }
}
