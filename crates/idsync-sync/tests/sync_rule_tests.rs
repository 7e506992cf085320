//! Sync Rule Administration Tests
//!
//! Exercises `SyncRuleService` against the memory store:
//! - Type and plurality compatibility of mappings
//! - Expression sources are compiled before they are stored
//! - Mapping create/update preconditions

use std::sync::Arc;

use idsync_db::models::{
    AttributeDataType, ConnectedSystem, ConnectedSystemAttribute, ConnectedSystemObjectType,
    Initiator, MappingSource, MappingTarget, MetaverseAttribute, MetaverseObjectType,
    ObjectMatchingRule, SyncRule, SyncRuleDirection, SyncRuleMapping,
};
use idsync_db::{
    ConnectedSystemRepository, MemoryStore, MetaverseRepository, SyncRuleRepository,
};
use idsync_sync::{ExpressionEngine, SyncError, SyncRuleService};

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    store: Arc<MemoryStore>,
    service: SyncRuleService,
    system: ConnectedSystem,
    person: MetaverseObjectType,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());

        let mut system = ConnectedSystem::new("HR", "memory");
        system.object_types.push(
            ConnectedSystemObjectType::new("user")
                .with_attribute(
                    ConnectedSystemAttribute::new("employeeId", AttributeDataType::Text)
                        .external_id(),
                )
                .with_attribute(ConnectedSystemAttribute::new("mail", AttributeDataType::Text))
                .with_attribute(ConnectedSystemAttribute::new(
                    "active",
                    AttributeDataType::Boolean,
                ))
                .with_attribute(
                    ConnectedSystemAttribute::new("groups", AttributeDataType::Text)
                        .multi_valued(),
                ),
        );
        store.save_connected_system(system.clone()).await.unwrap();

        let person = MetaverseObjectType::new("person")
            .with_attribute(MetaverseAttribute::new("email", AttributeDataType::Text))
            .with_attribute(MetaverseAttribute::new("enabled", AttributeDataType::Boolean))
            .with_attribute(
                MetaverseAttribute::new("memberOf", AttributeDataType::Text).multi_valued(),
            );
        store
            .save_metaverse_object_type(person.clone())
            .await
            .unwrap();

        let service = SyncRuleService::new(store.clone(), Arc::new(ExpressionEngine::new()));
        Self {
            store,
            service,
            system,
            person,
        }
    }

    fn cs_attr(&self, name: &str) -> idsync_core::AttributeId {
        self.system.object_types[0].attribute_by_name(name).unwrap().id
    }

    fn mv_attr(&self, name: &str) -> idsync_core::MetaverseAttributeId {
        self.person.attribute_by_name(name).unwrap().id
    }

    fn import_rule(&self) -> SyncRule {
        SyncRule::new(
            "HR users",
            self.system.id,
            self.system.object_types[0].id,
            self.person.id,
            SyncRuleDirection::Import,
        )
    }

    async fn saved_rule(&self) -> SyncRule {
        self.service
            .create_sync_rule(self.import_rule(), Initiator::System)
            .await
            .unwrap()
    }

    fn mapping(&self, rule: &SyncRule, from: &str, to: &str) -> SyncRuleMapping {
        SyncRuleMapping::new(rule.id, MappingTarget::MetaverseAttribute(self.mv_attr(to)))
            .with_source(MappingSource::ConnectedSystemAttribute(self.cs_attr(from)))
    }
}

fn validation_message(err: SyncError) -> String {
    match err {
        SyncError::MappingValidation { message } => message,
        other => panic!("expected a mapping validation error, got {other:?}"),
    }
}

// =============================================================================
// Compatibility
// =============================================================================

#[tokio::test]
async fn test_type_mismatch_names_both_attributes_and_types() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;

    let err = fx
        .service
        .create_sync_rule_mapping(fx.mapping(&rule, "mail", "enabled"), Initiator::System)
        .await
        .unwrap_err();

    let message = validation_message(err);
    assert!(message.contains("'mail'"), "{message}");
    assert!(message.contains("'enabled'"), "{message}");
    assert!(message.contains("Text"), "{message}");
    assert!(message.contains("Boolean"), "{message}");
}

#[tokio::test]
async fn test_multi_to_single_is_rejected() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;

    let err = fx
        .service
        .create_sync_rule_mapping(fx.mapping(&rule, "groups", "email"), Initiator::System)
        .await
        .unwrap_err();

    let message = validation_message(err);
    assert!(message.contains("multi-valued attribute 'groups'"), "{message}");
}

#[tokio::test]
async fn test_single_to_multi_is_accepted() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;

    let mapping = fx
        .service
        .create_sync_rule_mapping(fx.mapping(&rule, "mail", "memberOf"), Initiator::System)
        .await
        .unwrap();

    let stored = fx.store.get_sync_rule(rule.id).await.unwrap().unwrap();
    assert!(stored.mapping(mapping.id).is_some());
}

#[tokio::test]
async fn test_rule_with_invalid_mapping_is_not_stored() {
    let fx = Fixture::new().await;
    let mut rule = fx.import_rule();
    let bad = fx.mapping(&rule, "active", "email");
    rule.mappings.push(bad);

    let result = fx.service.create_sync_rule(rule.clone(), Initiator::System).await;

    assert!(matches!(result, Err(SyncError::MappingValidation { .. })));
    assert!(fx.store.get_sync_rule(rule.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_matching_rule_outside_rule_types_is_rejected() {
    let fx = Fixture::new().await;
    let mut rule = fx.import_rule();
    rule.object_matching_rules.push(ObjectMatchingRule {
        connected_system_attribute_id: fx.cs_attr("mail"),
        metaverse_attribute_id: idsync_core::MetaverseAttributeId::new(),
    });

    let err = fx
        .service
        .create_sync_rule(rule, Initiator::System)
        .await
        .unwrap_err();

    assert!(validation_message(err).contains("Object matching rule"));
}

// =============================================================================
// Expressions
// =============================================================================

#[tokio::test]
async fn test_expression_source_must_compile() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;

    let broken = SyncRuleMapping::new(
        rule.id,
        MappingTarget::MetaverseAttribute(fx.mv_attr("email")),
    )
    .with_source(MappingSource::Expression("cs[\"mail\"] +".to_string()));
    let result = fx
        .service
        .create_sync_rule_mapping(broken, Initiator::System)
        .await;
    assert!(matches!(result, Err(SyncError::Expression { .. })));

    let valid = SyncRuleMapping::new(
        rule.id,
        MappingTarget::MetaverseAttribute(fx.mv_attr("email")),
    )
    .with_source(MappingSource::Expression("lower(cs[\"mail\"])".to_string()));
    assert!(fx
        .service
        .create_sync_rule_mapping(valid, Initiator::System)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_expression_calling_unlisted_function_is_rejected() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;

    let mapping = SyncRuleMapping::new(
        rule.id,
        MappingTarget::MetaverseAttribute(fx.mv_attr("email")),
    )
    .with_source(MappingSource::Expression(
        "open_file(\"/etc/passwd\")".to_string(),
    ));
    let err = fx
        .service
        .create_sync_rule_mapping(mapping, Initiator::System)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Expression { .. }));
    let stored = fx.store.get_sync_rule(rule.id).await.unwrap().unwrap();
    assert!(stored.mappings.is_empty());
}

// =============================================================================
// Create / update preconditions
// =============================================================================

#[tokio::test]
async fn test_duplicate_mapping_is_invalid_state() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;
    let mapping = fx.mapping(&rule, "mail", "email");

    fx.service
        .create_sync_rule_mapping(mapping.clone(), Initiator::System)
        .await
        .unwrap();
    let result = fx
        .service
        .create_sync_rule_mapping(mapping, Initiator::System)
        .await;

    assert!(matches!(result, Err(SyncError::InvalidState { .. })));
}

#[tokio::test]
async fn test_mapping_on_unknown_rule_is_not_found() {
    let fx = Fixture::new().await;
    let rule = fx.import_rule();

    let result = fx
        .service
        .create_sync_rule_mapping(fx.mapping(&rule, "mail", "email"), Initiator::System)
        .await;

    assert!(matches!(result, Err(SyncError::NotFound { .. })));
}

#[tokio::test]
async fn test_update_of_missing_mapping_is_not_found() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;

    let result = fx
        .service
        .update_sync_rule_mapping(fx.mapping(&rule, "mail", "email"), Initiator::System)
        .await;

    assert!(matches!(result, Err(SyncError::NotFound { .. })));
}

#[tokio::test]
async fn test_update_revalidates_and_replaces() {
    let fx = Fixture::new().await;
    let rule = fx.saved_rule().await;
    let mapping = fx
        .service
        .create_sync_rule_mapping(fx.mapping(&rule, "mail", "email"), Initiator::System)
        .await
        .unwrap();

    let invalid = SyncRuleMapping {
        target: MappingTarget::MetaverseAttribute(fx.mv_attr("enabled")),
        ..mapping.clone()
    };
    assert!(fx
        .service
        .update_sync_rule_mapping(invalid, Initiator::System)
        .await
        .is_err());

    let moved = SyncRuleMapping {
        target: MappingTarget::MetaverseAttribute(fx.mv_attr("memberOf")),
        ..mapping.clone()
    };
    fx.service
        .update_sync_rule_mapping(moved, Initiator::System)
        .await
        .unwrap();

    let stored = fx
        .store
        .get_sync_rule_mapping(mapping.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored.target,
        MappingTarget::MetaverseAttribute(fx.mv_attr("memberOf"))
    );
}

#[tokio::test]
async fn test_mapping_cannot_move_between_rules() {
    let fx = Fixture::new().await;
    let first = fx.saved_rule().await;
    let second = fx.saved_rule().await;
    let mapping = fx
        .service
        .create_sync_rule_mapping(fx.mapping(&first, "mail", "email"), Initiator::System)
        .await
        .unwrap();

    let moved = SyncRuleMapping {
        sync_rule_id: second.id,
        ..mapping
    };
    let err = fx
        .service
        .update_sync_rule_mapping(moved, Initiator::System)
        .await
        .unwrap_err();

    assert!(validation_message(err).contains("cannot move"));
}
