//! Worker tasks: the unit a worker claims and runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_core::{
    ActivityId, ConnectedSystemId, RunProfileId, ScheduleExecutionId, WorkerTaskId,
};

use super::initiator::Initiator;
use super::schedule::ExecutionMode;

/// Status of a worker task.
///
/// `WaitingForPreviousStep -> Queued -> Processing -> {Completed, Failed}`,
/// and any non-terminal state may move to `CancellationRequested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerTaskStatus {
    /// Belongs to a later step group; invisible to workers.
    WaitingForPreviousStep,
    /// Ready to be claimed.
    Queued,
    /// Claimed by a worker.
    Processing,
    Completed,
    Failed,
    /// A cancel was requested; the owning worker stops it cooperatively.
    CancellationRequested,
}

impl WorkerTaskStatus {
    /// Completed and Failed are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: WorkerTaskStatus) -> bool {
        use WorkerTaskStatus::*;
        match (self, next) {
            (WaitingForPreviousStep, Queued) => true,
            (Queued, Processing) => true,
            (Processing, Completed | Failed) => true,
            (CancellationRequested, Completed | Failed) => true,
            (from, CancellationRequested) => !from.is_terminal() && *from != CancellationRequested,
            _ => false,
        }
    }
}

impl fmt::Display for WorkerTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForPreviousStep => write!(f, "waiting_for_previous_step"),
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::CancellationRequested => write!(f, "cancellation_requested"),
        }
    }
}

impl std::str::FromStr for WorkerTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting_for_previous_step" => Ok(Self::WaitingForPreviousStep),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancellation_requested" => Ok(Self::CancellationRequested),
            _ => Err(format!("Unknown worker task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub id: WorkerTaskId,
    /// Set for tasks created from a schedule; ad-hoc runs have none.
    #[serde(default)]
    pub schedule_execution_id: Option<ScheduleExecutionId>,
    pub step_index: u32,
    pub connected_system_id: ConnectedSystemId,
    pub run_profile_id: RunProfileId,
    pub status: WorkerTaskStatus,
    pub execution_mode: ExecutionMode,
    pub continue_on_failure: bool,
    pub initiated_by: Initiator,
    #[serde(default)]
    pub activity_id: Option<ActivityId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl WorkerTask {
    /// An ad-hoc task, queued immediately.
    pub fn ad_hoc(
        connected_system_id: ConnectedSystemId,
        run_profile_id: RunProfileId,
        initiated_by: Initiator,
    ) -> Self {
        Self {
            id: WorkerTaskId::new(),
            schedule_execution_id: None,
            step_index: 0,
            connected_system_id,
            run_profile_id,
            status: WorkerTaskStatus::Queued,
            execution_mode: ExecutionMode::Sequential,
            continue_on_failure: false,
            initiated_by,
            activity_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}
