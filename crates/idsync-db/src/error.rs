//! Error types for the idsync-db crate.

use idsync_core::IdsyncError;
use thiserror::Error;

/// Store operation errors.
///
/// # Example
///
/// ```rust
/// use idsync_db::StoreError;
///
/// fn handle_error(err: StoreError) {
///     match err {
///         StoreError::NotFound(msg) => eprintln!("Not found: {}", msg),
///         StoreError::Conflict(msg) => eprintln!("Conflict: {}", msg),
///         StoreError::InvalidState(msg) => eprintln!("Invalid state: {}", msg),
///     }
/// }
/// ```
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint would be violated.
    ///
    /// Raised for a second CSO with the same system, object type and external id.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The stored row is not in a state that allows the change.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl StoreError {
    pub fn not_found(resource: &str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound(format!("{resource} {id}"))
    }

    /// Check if this error indicates a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Check if this error indicates a uniqueness conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<StoreError> for IdsyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => IdsyncError::NotFound {
                resource: msg,
                id: None,
            },
            StoreError::Conflict(msg) | StoreError::InvalidState(msg) => {
                IdsyncError::invalid_state(msg)
            }
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = StoreError::not_found("ConnectedSystem", "abc");
        assert_eq!(err.to_string(), "Not found: ConnectedSystem abc");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_converts_to_core_error() {
        let err: IdsyncError = StoreError::Conflict("duplicate external id".into()).into();
        assert_eq!(err, IdsyncError::invalid_state("duplicate external id"));
    }
}
