//! # Connector Framework
//!
//! Capability traits and exchange types between the idsync engine and
//! connected systems.
//!
//! ## Architecture
//!
//! - [`Connector`] - Base trait with name, capability flags and settings
//! - [`SchemaDiscovery`], [`PartitionDiscovery`] - Discover what a system holds
//! - [`ImportCapable`] - Paged full and delta imports
//! - [`ExportCapable`] - Batched export of pending changes
//!
//! Connector types are registered in a [`ConnectorRegistry`] at startup. The
//! built-in [`memory`] connector keeps objects in process.
//!
//! ## Example
//!
//! ```ignore
//! use idsync_connector::prelude::*;
//!
//! let mut registry = ConnectorRegistry::new();
//! MemoryConnectorFactory::new().register(&mut registry);
//!
//! let instance = registry.create(&connected_system)?;
//! let import = instance.import(ConnectorCapability::SupportsFullImport)?;
//! import.open_import_connection(&connected_system.setting_values).await?;
//! ```

pub mod capabilities;
pub mod error;
pub mod export;
pub mod import;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod traits;

pub use capabilities::{ConnectorCapabilities, ConnectorCapability};
pub use error::{ConnectorError, ConnectorResult};
pub use registry::{ConnectorFactory, ConnectorInstance, ConnectorRegistry};
pub use traits::{
    Connector, ConnectorSettings, ExportCapable, ImportCapable, PartitionDiscovery,
    SchemaDiscovery,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::capabilities::{ConnectorCapabilities, ConnectorCapability};
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::export::ExportObjectResult;
    pub use crate::import::{
        ImportChangeType, ImportMode, ImportObject, ImportObjectAttribute,
        ImportObjectTypeSelection, ImportPage, ImportRequest,
    };
    pub use crate::memory::{
        MemoryConnector, MemoryConnectorFactory, MemoryDirectory, MemoryObject,
        MEMORY_CONNECTOR_TYPE,
    };
    pub use crate::registry::{ConnectorFactory, ConnectorInstance, ConnectorRegistry};
    pub use crate::schema::{
        ConnectorContainer, ConnectorPartition, ConnectorSchema, ConnectorSettingDefinition,
        SchemaAttribute, SchemaObjectType, SettingType, SettingValidationFailure,
    };
    pub use crate::traits::{
        Connector, ConnectorSettings, ExportCapable, ImportCapable, PartitionDiscovery,
        SchemaDiscovery,
    };
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
