//! Sync rule administration.

use std::sync::Arc;

use tracing::{info, instrument};

use idsync_core::SyncRuleId;
use idsync_db::models::{ConnectedSystem, Initiator, MetaverseObjectType, SyncRule, SyncRuleMapping};
use idsync_db::SyncStore;

use crate::error::{SyncError, SyncResult};
use crate::rules::expression::ExpressionEngine;
use crate::rules::validation::{validate_mapping, MappingSchemas};

/// Creates and updates sync rules and their mappings.
///
/// The initiator is logged for audit only; validation never depends on it.
pub struct SyncRuleService {
    store: Arc<dyn SyncStore>,
    expressions: Arc<ExpressionEngine>,
}

impl SyncRuleService {
    pub fn new(store: Arc<dyn SyncStore>, expressions: Arc<ExpressionEngine>) -> Self {
        Self { store, expressions }
    }

    async fn load_rule(
        &self,
        id: SyncRuleId,
    ) -> SyncResult<(SyncRule, ConnectedSystem, MetaverseObjectType)> {
        let rule = self
            .store
            .get_sync_rule(id)
            .await?
            .ok_or_else(|| SyncError::not_found("Sync rule", id))?;
        let (system, mv_type) = self.load_schemas(&rule).await?;
        Ok((rule, system, mv_type))
    }

    async fn load_schemas(
        &self,
        rule: &SyncRule,
    ) -> SyncResult<(ConnectedSystem, MetaverseObjectType)> {
        let system = self
            .store
            .get_connected_system(rule.connected_system_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Connected system", rule.connected_system_id))?;
        let mv_type = self
            .store
            .get_metaverse_object_type(rule.metaverse_object_type_id)
            .await?
            .ok_or_else(|| {
                SyncError::not_found("Metaverse object type", rule.metaverse_object_type_id)
            })?;
        Ok((system, mv_type))
    }

    fn validate(
        &self,
        rule: &SyncRule,
        system: &ConnectedSystem,
        mv_type: &MetaverseObjectType,
        mapping: &SyncRuleMapping,
    ) -> SyncResult<()> {
        let cs_type = system
            .object_type(rule.connected_system_object_type_id)
            .ok_or_else(|| {
                SyncError::mapping_validation(format!(
                    "Object type {} is not part of connected system '{}'",
                    rule.connected_system_object_type_id, system.name
                ))
            })?;
        let schemas = MappingSchemas {
            connected_system_type: cs_type,
            metaverse_type: mv_type,
        };
        validate_mapping(rule, mapping, &schemas, &self.expressions)
    }

    /// Create a sync rule. Every mapping and matching rule it carries is
    /// validated first.
    #[instrument(skip(self, rule), fields(rule = %rule.name, initiator = %initiator))]
    pub async fn create_sync_rule(
        &self,
        rule: SyncRule,
        initiator: Initiator,
    ) -> SyncResult<SyncRule> {
        let (system, mv_type) = self.load_schemas(&rule).await?;
        for mapping in &rule.mappings {
            self.validate(&rule, &system, &mv_type, mapping)?;
        }

        let cs_type = system.object_type(rule.connected_system_object_type_id);
        for matching in &rule.object_matching_rules {
            let cs_attr = cs_type.and_then(|t| t.attribute(matching.connected_system_attribute_id));
            let mv_attr = mv_type.attribute(matching.metaverse_attribute_id);
            if cs_attr.is_none() || mv_attr.is_none() {
                return Err(SyncError::mapping_validation(
                    "Object matching rule refers to an attribute outside the rule's object types",
                ));
            }
        }

        self.store.save_sync_rule(rule.clone()).await?;
        info!(rule_id = %rule.id, mappings = rule.mappings.len(), "Sync rule created");
        Ok(rule)
    }

    /// Validate and add a mapping to its rule.
    #[instrument(skip(self, mapping), fields(mapping_id = %mapping.id, initiator = %initiator))]
    pub async fn create_sync_rule_mapping(
        &self,
        mapping: SyncRuleMapping,
        initiator: Initiator,
    ) -> SyncResult<SyncRuleMapping> {
        let (rule, system, mv_type) = self.load_rule(mapping.sync_rule_id).await?;
        if rule.mapping(mapping.id).is_some() {
            return Err(SyncError::invalid_state(format!(
                "Mapping {} already exists",
                mapping.id
            )));
        }
        self.validate(&rule, &system, &mv_type, &mapping)?;

        self.store.save_sync_rule_mapping(mapping.clone()).await?;
        info!(rule_id = %rule.id, "Sync rule mapping created");
        Ok(mapping)
    }

    /// Validate and replace an existing mapping.
    #[instrument(skip(self, mapping), fields(mapping_id = %mapping.id, initiator = %initiator))]
    pub async fn update_sync_rule_mapping(
        &self,
        mapping: SyncRuleMapping,
        initiator: Initiator,
    ) -> SyncResult<SyncRuleMapping> {
        let existing = self
            .store
            .get_sync_rule_mapping(mapping.id)
            .await?
            .ok_or_else(|| SyncError::not_found("Sync rule mapping", mapping.id))?;
        if existing.sync_rule_id != mapping.sync_rule_id {
            return Err(SyncError::mapping_validation(
                "A mapping cannot move to another sync rule",
            ));
        }

        let (rule, system, mv_type) = self.load_rule(mapping.sync_rule_id).await?;
        self.validate(&rule, &system, &mv_type, &mapping)?;

        self.store.save_sync_rule_mapping(mapping.clone()).await?;
        info!(rule_id = %rule.id, "Sync rule mapping updated");
        Ok(mapping)
    }
}
