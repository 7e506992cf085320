//! Connector capability traits
//!
//! A connector implements [`Connector`] plus the capability traits it
//! supports. The engine checks the declared capability flags before it calls
//! into a capability.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use idsync_db::models::{PendingExport, SettingValue};

use crate::capabilities::{ConnectorCapabilities, ConnectorCapability};
use crate::error::ConnectorResult;
use crate::export::ExportObjectResult;
use crate::import::{ImportPage, ImportRequest};
use crate::schema::{
    ConnectorPartition, ConnectorSchema, ConnectorSettingDefinition, SettingValidationFailure,
};

/// Settings of a connected system, as passed to a connector.
pub type ConnectorSettings = HashMap<String, SettingValue>;

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Registry key and display name of the connector.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ConnectorCapabilities;

    /// Settings the connector understands.
    fn settings_schema(&self) -> Vec<ConnectorSettingDefinition>;

    /// Check supplied settings against [`Connector::settings_schema`].
    ///
    /// The default checks presence of required settings and value types.
    fn validate_settings(&self, settings: &ConnectorSettings) -> Vec<SettingValidationFailure> {
        let mut failures = Vec::new();
        for definition in self.settings_schema() {
            match settings.get(&definition.name) {
                None if definition.required && definition.default_value.is_none() => {
                    failures.push(SettingValidationFailure {
                        setting: definition.name.clone(),
                        message: "setting is required".to_string(),
                    });
                }
                Some(value) if !definition.accepts(value) => {
                    failures.push(SettingValidationFailure {
                        setting: definition.name.clone(),
                        message: format!("expected a {:?} value", definition.setting_type),
                    });
                }
                _ => {}
            }
        }
        failures
    }

    fn supports(&self, capability: ConnectorCapability) -> bool {
        self.capabilities().supports(capability)
    }
}

/// Capability for discovering the schema of a connected system.
#[async_trait]
pub trait SchemaDiscovery: Connector {
    async fn get_schema(&self, settings: &ConnectorSettings) -> ConnectorResult<ConnectorSchema>;
}

/// Capability for discovering partitions and containers.
#[async_trait]
pub trait PartitionDiscovery: Connector {
    async fn get_partitions(
        &self,
        settings: &ConnectorSettings,
    ) -> ConnectorResult<Vec<ConnectorPartition>>;
}

/// Capability for reading objects from a connected system.
#[async_trait]
pub trait ImportCapable: Connector {
    async fn open_import_connection(&self, settings: &ConnectorSettings) -> ConnectorResult<()>;

    /// Return the next page. Implementations should check `cancel` between
    /// expensive steps and return [`ConnectorError::Cancelled`] when set.
    ///
    /// [`ConnectorError::Cancelled`]: crate::error::ConnectorError::Cancelled
    async fn import(
        &self,
        request: &ImportRequest,
        cancel: &CancellationToken,
    ) -> ConnectorResult<ImportPage>;

    async fn close_import_connection(&self) -> ConnectorResult<()>;
}

/// Capability for writing pending exports to a connected system.
#[async_trait]
pub trait ExportCapable: Connector {
    async fn open_export_connection(&self, settings: &ConnectorSettings) -> ConnectorResult<()>;

    /// Export a batch. Returns one result per pending export; an `Err` means
    /// the whole batch failed.
    async fn export(
        &self,
        exports: &[PendingExport],
        cancel: &CancellationToken,
    ) -> ConnectorResult<Vec<ExportObjectResult>>;

    async fn close_export_connection(&self) -> ConnectorResult<()>;

    /// Containers the connector created while exporting.
    fn created_container_dns(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SettingType;

    struct SettingsOnly;

    impl Connector for SettingsOnly {
        fn name(&self) -> &str {
            "settings-only"
        }

        fn capabilities(&self) -> ConnectorCapabilities {
            ConnectorCapabilities::new().with(ConnectorCapability::SupportsFullImport)
        }

        fn settings_schema(&self) -> Vec<ConnectorSettingDefinition> {
            vec![
                ConnectorSettingDefinition::new("path", SettingType::Text).required(),
                ConnectorSettingDefinition::new("page_size", SettingType::Number),
            ]
        }
    }

    #[test]
    fn test_validate_settings_reports_missing_required() {
        let failures = SettingsOnly.validate_settings(&ConnectorSettings::new());
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].setting, "path");
    }

    #[test]
    fn test_validate_settings_reports_wrong_type() {
        let mut settings = ConnectorSettings::new();
        settings.insert("path".into(), SettingValue::Text("/tmp/hr.csv".into()));
        settings.insert("page_size".into(), SettingValue::Text("ten".into()));
        let failures = SettingsOnly.validate_settings(&settings);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].setting, "page_size");
    }

    #[test]
    fn test_supports_uses_capabilities() {
        assert!(SettingsOnly.supports(ConnectorCapability::SupportsFullImport));
        assert!(!SettingsOnly.supports(ConnectorCapability::SupportsExport));
    }
}
