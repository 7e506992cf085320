//! Error Types
//!
//! Standardized error type shared by the idsync crates. Engine crates define
//! their own richer error enums and convert into or wrap this one where a
//! condition has to cross a crate boundary unchanged.

use serde::Serialize;
use thiserror::Error;

/// Standardized error type for idsync.
///
/// - `NotFound` - a referenced entity does not exist
/// - `Validation` - configuration or input failed validation
/// - `InvalidState` - an operation is not allowed in the entity's current state
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdsyncError {
    /// Requested entity was not found.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        /// The type of entity that was not found (e.g., "ConnectedSystem")
        resource: String,
        /// Optional identifier of the entity
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Input or configuration validation failure.
    #[error("Validation error on field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },

    /// Operation rejected because of the entity's current state.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of the conflicting state
        message: String,
    },
}

impl IdsyncError {
    /// Create a not found error for a resource with an identifier.
    pub fn not_found(resource: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.to_string()),
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}

/// Type alias for Results using `IdsyncError`.
pub type Result<T> = std::result::Result<T, IdsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_with_id() {
        let error = IdsyncError::not_found("ConnectedSystem", "abc");
        assert_eq!(error.to_string(), "ConnectedSystem not found: abc");
    }

    #[test]
    fn test_not_found_display_without_id() {
        let error = IdsyncError::NotFound {
            resource: "Schedule".to_string(),
            id: None,
        };
        assert_eq!(error.to_string(), "Schedule not found");
    }

    #[test]
    fn test_validation_display() {
        let error = IdsyncError::validation("max_export_parallelism", "must be at least 1");
        assert_eq!(
            error.to_string(),
            "Validation error on field 'max_export_parallelism': must be at least 1"
        );
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let error = IdsyncError::invalid_state("execution already completed");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["type"], "invalid_state");
        assert_eq!(json["message"], "execution already completed");
    }
}
