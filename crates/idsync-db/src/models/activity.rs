//! Activities: the record of one run profile execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_core::{
    ActivityId, ConnectedSystemId, ConnectedSystemObjectId, RunProfileId, WorkerTaskId,
};

use super::connected_system::RunType;
use super::initiator::Initiator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    InProgress,
    Complete,
    /// Finished, but some objects failed.
    CompleteWithWarning,
    FailedWithError,
    Cancelled,
}

impl ActivityStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
            Self::CompleteWithWarning => write!(f, "complete_with_warning"),
            Self::FailedWithError => write!(f, "failed_with_error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    #[serde(default)]
    pub objects_added: u32,
    #[serde(default)]
    pub objects_updated: u32,
    #[serde(default)]
    pub objects_obsoleted: u32,
    #[serde(default)]
    pub objects_unchanged: u32,
    #[serde(default)]
    pub object_errors: u32,
    #[serde(default)]
    pub objects_projected: u32,
    #[serde(default)]
    pub objects_joined: u32,
    #[serde(default)]
    pub objects_disconnected: u32,
    /// Metaverse attribute value sets changed by attribute flow.
    #[serde(default)]
    pub attribute_flows: u32,
    #[serde(default)]
    pub pending_exports_created: u32,
    #[serde(default)]
    pub objects_exported: u32,
    #[serde(default)]
    pub export_errors: u32,
    #[serde(default)]
    pub references_resolved: u32,
    #[serde(default)]
    pub unresolved_references: u32,
    #[serde(default)]
    pub duration_ms: u64,
}

impl RunStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total objects the run changed in any way.
    #[must_use]
    pub fn total_changes(&self) -> u32 {
        self.objects_added
            + self.objects_updated
            + self.objects_obsoleted
            + self.objects_projected
            + self.objects_joined
            + self.objects_disconnected
    }

    pub fn merge(&mut self, other: &RunStatistics) {
        self.objects_added += other.objects_added;
        self.objects_updated += other.objects_updated;
        self.objects_obsoleted += other.objects_obsoleted;
        self.objects_unchanged += other.objects_unchanged;
        self.object_errors += other.object_errors;
        self.objects_projected += other.objects_projected;
        self.objects_joined += other.objects_joined;
        self.objects_disconnected += other.objects_disconnected;
        self.attribute_flows += other.attribute_flows;
        self.pending_exports_created += other.pending_exports_created;
        self.objects_exported += other.objects_exported;
        self.export_errors += other.export_errors;
        self.references_resolved += other.references_resolved;
        self.unresolved_references = other.unresolved_references;
        self.duration_ms += other.duration_ms;
    }
}

/// Category of a per-object failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectErrorType {
    MissingExternalId,
    UnknownObjectType,
    TypeMismatch,
    TooManyValues,
    AmbiguousMatch,
    Expression,
    Export,
    Other,
}

/// A failure of one object that did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityObjectError {
    pub error_type: ObjectErrorType,
    pub message: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub connected_system_object_id: Option<ConnectedSystemObjectId>,
}

impl ActivityObjectError {
    pub fn new(error_type: ObjectErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            external_id: None,
            object_type: None,
            connected_system_object_id: None,
        }
    }

    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    #[must_use]
    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    #[must_use]
    pub fn with_cso(mut self, id: ConnectedSystemObjectId) -> Self {
        self.connected_system_object_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub connected_system_id: ConnectedSystemId,
    #[serde(default)]
    pub run_profile_id: Option<RunProfileId>,
    #[serde(default)]
    pub run_type: Option<RunType>,
    #[serde(default)]
    pub worker_task_id: Option<WorkerTaskId>,
    pub initiated_by: Initiator,
    pub status: ActivityStatus,
    #[serde(default)]
    pub statistics: RunStatistics,
    #[serde(default)]
    pub object_errors: Vec<ActivityObjectError>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Activity {
    pub fn start(
        connected_system_id: ConnectedSystemId,
        run_profile_id: Option<RunProfileId>,
        run_type: Option<RunType>,
        initiated_by: Initiator,
    ) -> Self {
        Self {
            id: ActivityId::new(),
            connected_system_id,
            run_profile_id,
            run_type,
            worker_task_id: None,
            initiated_by,
            status: ActivityStatus::InProgress,
            statistics: RunStatistics::default(),
            object_errors: Vec::new(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Close the activity. The status reflects object errors unless the run
    /// already failed or was cancelled.
    pub fn finish(&mut self, status: ActivityStatus) {
        self.status = match status {
            ActivityStatus::Complete if !self.object_errors.is_empty() => {
                ActivityStatus::CompleteWithWarning
            }
            other => other,
        };
        self.completed_at = Some(Utc::now());
    }
}
