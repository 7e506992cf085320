//! Sync rules: mapping validation, the expression sandbox and rule
//! administration.

pub mod expression;
pub mod service;
pub mod validation;

pub use expression::{ExpressionContext, ExpressionEngine, ExpressionEngineConfig, ALLOWED_FUNCTIONS};
pub use service::SyncRuleService;
pub use validation::{check_compatibility, validate_mapping, AttributeShape, MappingSchemas};
