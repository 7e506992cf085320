//! Sync error types.

use thiserror::Error;

use idsync_connector::ConnectorError;
use idsync_core::IdsyncError;
use idsync_db::StoreError;

/// Errors that stop a synchronisation operation.
///
/// Failures of single objects are not errors; they are recorded on the
/// activity and the run continues.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Connector error.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// A sync rule mapping was rejected.
    #[error("{message}")]
    MappingValidation { message: String },

    /// An expression failed to compile or evaluate.
    #[error("Expression error: {message}")]
    Expression { message: String },

    /// Not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Operation not allowed in the current state.
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The run was cancelled.
    #[error("Run cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a mapping validation error.
    pub fn mapping_validation(message: impl Into<String>) -> Self {
        Self::MappingValidation {
            message: message.into(),
        }
    }

    /// Create an expression error.
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True when the run stopped because it was cancelled, by the engine or
    /// inside the connector.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled | SyncError::Connector(ConnectorError::Cancelled)
        )
    }
}

impl From<SyncError> for IdsyncError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Store(e) => e.into(),
            SyncError::NotFound { entity, id } => IdsyncError::not_found(entity, id),
            SyncError::MappingValidation { message } => IdsyncError::validation("mapping", message),
            SyncError::Expression { message } => IdsyncError::validation("expression", message),
            SyncError::Configuration { message } => IdsyncError::validation("configuration", message),
            other => IdsyncError::invalid_state(other.to_string()),
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
