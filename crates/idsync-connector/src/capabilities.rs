//! Capability flags a connector declares.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectorCapability {
    SupportsFullImport,
    SupportsDeltaImport,
    SupportsExport,
    SupportsPartitions,
    SupportsPartitionContainers,
    SupportsSecondaryExternalId,
    SupportsUserSelectedExternalId,
    SupportsUserSelectedAttributeTypes,
    /// Export batches may be sent concurrently.
    SupportsParallelExport,
}

impl ConnectorCapability {
    #[must_use]
    pub fn all() -> &'static [ConnectorCapability] {
        &[
            ConnectorCapability::SupportsFullImport,
            ConnectorCapability::SupportsDeltaImport,
            ConnectorCapability::SupportsExport,
            ConnectorCapability::SupportsPartitions,
            ConnectorCapability::SupportsPartitionContainers,
            ConnectorCapability::SupportsSecondaryExternalId,
            ConnectorCapability::SupportsUserSelectedExternalId,
            ConnectorCapability::SupportsUserSelectedAttributeTypes,
            ConnectorCapability::SupportsParallelExport,
        ]
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorCapability::SupportsFullImport => "SupportsFullImport",
            ConnectorCapability::SupportsDeltaImport => "SupportsDeltaImport",
            ConnectorCapability::SupportsExport => "SupportsExport",
            ConnectorCapability::SupportsPartitions => "SupportsPartitions",
            ConnectorCapability::SupportsPartitionContainers => "SupportsPartitionContainers",
            ConnectorCapability::SupportsSecondaryExternalId => "SupportsSecondaryExternalId",
            ConnectorCapability::SupportsUserSelectedExternalId => {
                "SupportsUserSelectedExternalId"
            }
            ConnectorCapability::SupportsUserSelectedAttributeTypes => {
                "SupportsUserSelectedAttributeTypes"
            }
            ConnectorCapability::SupportsParallelExport => "SupportsParallelExport",
        }
    }
}

impl fmt::Display for ConnectorCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The set of capabilities of one connector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorCapabilities(BTreeSet<ConnectorCapability>);

impl ConnectorCapabilities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, capability: ConnectorCapability) -> Self {
        self.0.insert(capability);
        self
    }

    #[must_use]
    pub fn without(mut self, capability: ConnectorCapability) -> Self {
        self.0.remove(&capability);
        self
    }

    #[must_use]
    pub fn supports(&self, capability: ConnectorCapability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = ConnectorCapability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ConnectorCapability> for ConnectorCapabilities {
    fn from_iter<I: IntoIterator<Item = ConnectorCapability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports() {
        let caps = ConnectorCapabilities::new()
            .with(ConnectorCapability::SupportsFullImport)
            .with(ConnectorCapability::SupportsExport);
        assert!(caps.supports(ConnectorCapability::SupportsFullImport));
        assert!(!caps.supports(ConnectorCapability::SupportsParallelExport));

        let caps = caps.without(ConnectorCapability::SupportsExport);
        assert!(!caps.supports(ConnectorCapability::SupportsExport));
    }

    #[test]
    fn test_all_has_nine_flags() {
        let caps: ConnectorCapabilities = ConnectorCapability::all().iter().copied().collect();
        assert_eq!(caps.iter().count(), 9);
    }

    #[test]
    fn test_serializes_as_flag_names() {
        let caps = ConnectorCapabilities::new().with(ConnectorCapability::SupportsDeltaImport);
        let json = serde_json::to_string(&caps).unwrap();
        assert_eq!(json, "[\"SupportsDeltaImport\"]");
    }
}
