//! Connector errors.
//!
//! Connection problems are transient and worth retrying on the next run;
//! everything else needs a change of configuration or data.

use thiserror::Error;

use crate::capabilities::ConnectorCapability;

/// Error raised by a connector or the registry.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The connected system refused or dropped the connection.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Import or export was called outside an open connection.
    #[error("{operation} connection is not open")]
    NotConnected { operation: String },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No factory is registered under the connected system's type key.
    #[error("unsupported connector type: {connector_type}")]
    UnsupportedConnectorType { connector_type: String },

    /// A run needs a capability the connector does not declare.
    #[error("connector '{connector}' does not support {capability}")]
    CapabilityNotSupported {
        connector: String,
        capability: ConnectorCapability,
    },

    #[error("object type '{object_type}' not found in schema")]
    ObjectTypeNotFound { object_type: String },

    /// The connected system rejected one object.
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    /// Create of an external id that is already taken.
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Update of an external id the system does not hold.
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// A pagination token from a previous page could not be read back.
    #[error("invalid pagination token: {token}")]
    InvalidPaginationToken { token: String },

    /// The connector observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl ConnectorError {
    /// Whether the same call may succeed later without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::ConnectionFailed { .. })
    }

    /// Stable code for logs and activity errors.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::NotConnected { .. } => "NOT_CONNECTED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::UnsupportedConnectorType { .. } => "UNSUPPORTED_TYPE",
            ConnectorError::CapabilityNotSupported { .. } => "CAPABILITY_NOT_SUPPORTED",
            ConnectorError::ObjectTypeNotFound { .. } => "OBJECT_TYPE_NOT_FOUND",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::InvalidPaginationToken { .. } => "INVALID_PAGINATION_TOKEN",
            ConnectorError::Cancelled => "CANCELLED",
        }
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn capability_not_supported(
        connector: impl Into<String>,
        capability: ConnectorCapability,
    ) -> Self {
        ConnectorError::CapabilityNotSupported {
            connector: connector.into(),
            capability,
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
