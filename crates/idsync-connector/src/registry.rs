//! Static connector registry.
//!
//! Connector types are registered once at startup under a string key. A
//! [`ConnectorInstance`] is created per run from the connected system's
//! configuration and exposes each capability the connector implements.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use idsync_db::models::ConnectedSystem;

use crate::capabilities::ConnectorCapability;
use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::{Connector, ExportCapable, ImportCapable, PartitionDiscovery, SchemaDiscovery};

/// Builds a connector instance for one connected system.
pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectedSystem) -> ConnectorResult<ConnectorInstance> + Send + Sync>;

/// A connector together with the capability views it offers.
#[derive(Clone)]
pub struct ConnectorInstance {
    connector: Arc<dyn Connector>,
    schema: Option<Arc<dyn SchemaDiscovery>>,
    partitions: Option<Arc<dyn PartitionDiscovery>>,
    import: Option<Arc<dyn ImportCapable>>,
    export: Option<Arc<dyn ExportCapable>>,
}

impl ConnectorInstance {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            schema: None,
            partitions: None,
            import: None,
            export: None,
        }
    }

    #[must_use]
    pub fn with_schema_discovery(mut self, schema: Arc<dyn SchemaDiscovery>) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_partition_discovery(mut self, partitions: Arc<dyn PartitionDiscovery>) -> Self {
        self.partitions = Some(partitions);
        self
    }

    #[must_use]
    pub fn with_import(mut self, import: Arc<dyn ImportCapable>) -> Self {
        self.import = Some(import);
        self
    }

    #[must_use]
    pub fn with_export(mut self, export: Arc<dyn ExportCapable>) -> Self {
        self.export = Some(export);
        self
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn name(&self) -> &str {
        self.connector.name()
    }

    pub fn supports(&self, capability: ConnectorCapability) -> bool {
        self.connector.supports(capability)
    }

    pub fn schema_discovery(&self) -> ConnectorResult<&Arc<dyn SchemaDiscovery>> {
        self.schema.as_ref().ok_or_else(|| {
            ConnectorError::operation_failed(format!(
                "connector '{}' does not implement schema discovery",
                self.name()
            ))
        })
    }

    pub fn partition_discovery(&self) -> ConnectorResult<&Arc<dyn PartitionDiscovery>> {
        match &self.partitions {
            Some(p) if self.supports(ConnectorCapability::SupportsPartitions) => Ok(p),
            _ => Err(ConnectorError::capability_not_supported(
                self.name(),
                ConnectorCapability::SupportsPartitions,
            )),
        }
    }

    /// The import capability, provided the connector declares `required`.
    pub fn import(
        &self,
        required: ConnectorCapability,
    ) -> ConnectorResult<&Arc<dyn ImportCapable>> {
        match &self.import {
            Some(import) if self.supports(required) => Ok(import),
            _ => Err(ConnectorError::capability_not_supported(self.name(), required)),
        }
    }

    pub fn export(&self) -> ConnectorResult<&Arc<dyn ExportCapable>> {
        match &self.export {
            Some(export) if self.supports(ConnectorCapability::SupportsExport) => Ok(export),
            _ => Err(ConnectorError::capability_not_supported(
                self.name(),
                ConnectorCapability::SupportsExport,
            )),
        }
    }
}

impl fmt::Debug for ConnectorInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorInstance")
            .field("name", &self.name())
            .field("import", &self.import.is_some())
            .field("export", &self.export.is_some())
            .finish()
    }
}

/// Registry of connector types keyed by connector type string.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector type. A second registration replaces the first.
    pub fn register<F>(&mut self, connector_type: impl Into<String>, factory: F)
    where
        F: Fn(&ConnectedSystem) -> ConnectorResult<ConnectorInstance> + Send + Sync + 'static,
    {
        self.factories
            .insert(connector_type.into().to_lowercase(), Arc::new(factory));
    }

    #[must_use]
    pub fn is_registered(&self, connector_type: &str) -> bool {
        self.factories.contains_key(&connector_type.to_lowercase())
    }

    pub fn connector_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Create the connector for a connected system.
    pub fn create(&self, system: &ConnectedSystem) -> ConnectorResult<ConnectorInstance> {
        let factory = self
            .factories
            .get(&system.connector_type.to_lowercase())
            .ok_or_else(|| ConnectorError::UnsupportedConnectorType {
                connector_type: system.connector_type.clone(),
            })?;
        factory(system)
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connector_types", &self.connector_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ConnectorCapabilities;
    use crate::schema::ConnectorSettingDefinition;

    struct NoOp;

    impl Connector for NoOp {
        fn name(&self) -> &str {
            "noop"
        }

        fn capabilities(&self) -> ConnectorCapabilities {
            ConnectorCapabilities::new()
        }

        fn settings_schema(&self) -> Vec<ConnectorSettingDefinition> {
            Vec::new()
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let registry = ConnectorRegistry::new();
        let system = ConnectedSystem::new("HR", "ldap");
        let err = registry.create(&system).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn test_registered_type_is_case_insensitive() {
        let mut registry = ConnectorRegistry::new();
        registry.register("NoOp", |_| Ok(ConnectorInstance::new(Arc::new(NoOp))));
        assert!(registry.is_registered("noop"));

        let system = ConnectedSystem::new("HR", "NOOP");
        let instance = registry.create(&system).unwrap();
        assert_eq!(instance.name(), "noop");
    }

    #[test]
    fn test_missing_capability_is_an_error() {
        let instance = ConnectorInstance::new(Arc::new(NoOp));
        let err = instance
            .import(ConnectorCapability::SupportsFullImport)
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "CAPABILITY_NOT_SUPPORTED");
        assert!(instance.export().is_err());
    }
}
