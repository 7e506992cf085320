//! Export exchange types.

use serde::{Deserialize, Serialize};

use idsync_core::PendingExportId;

/// Outcome of exporting one pending export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportObjectResult {
    pub pending_export_id: PendingExportId,
    /// External id assigned by the connected system on create.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Set when this object failed; siblings are unaffected.
    #[serde(default)]
    pub error: Option<String>,
}

impl ExportObjectResult {
    pub fn success(pending_export_id: PendingExportId) -> Self {
        Self {
            pending_export_id,
            external_id: None,
            error: None,
        }
    }

    pub fn created(pending_export_id: PendingExportId, external_id: impl Into<String>) -> Self {
        Self {
            pending_export_id,
            external_id: Some(external_id.into()),
            error: None,
        }
    }

    pub fn failed(pending_export_id: PendingExportId, error: impl Into<String>) -> Self {
        Self {
            pending_export_id,
            external_id: None,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
