//! Schedules and their executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use idsync_core::{
    ConnectedSystemId, RunProfileId, ScheduleExecutionId, ScheduleId, ScheduleStepId,
};

use super::initiator::Initiator;

/// Whether the tasks of one step group run one at a time or together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

/// An ordered list of run profile invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub enabled: bool,
    #[serde(default)]
    pub steps: Vec<ScheduleStep>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ScheduleId::new(),
            name: name.into(),
            enabled: true,
            steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: ScheduleStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// One run profile invocation. Steps sharing a `step_index` form a group that
/// runs in parallel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStep {
    pub id: ScheduleStepId,
    pub step_index: u32,
    pub connected_system_id: ConnectedSystemId,
    pub run_profile_id: RunProfileId,
    /// Stored hint only. The task's mode is derived from the group size.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl ScheduleStep {
    pub fn new(
        step_index: u32,
        connected_system_id: ConnectedSystemId,
        run_profile_id: RunProfileId,
    ) -> Self {
        Self {
            id: ScheduleStepId::new(),
            step_index,
            connected_system_id,
            run_profile_id,
            execution_mode: ExecutionMode::Sequential,
            continue_on_failure: false,
        }
    }

    #[must_use]
    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }
}

/// Status of a schedule execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleExecutionStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleExecutionStatus {
    /// Check if this status is terminal (execution has ended).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the execution can be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Queued | Self::InProgress)
    }
}

impl fmt::Display for ScheduleExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ScheduleExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown schedule execution status: {}", s)),
        }
    }
}

/// One run of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub id: ScheduleExecutionId,
    pub schedule_id: ScheduleId,
    pub schedule_name: String,
    pub status: ScheduleExecutionStatus,
    /// Step index of the group currently released to workers.
    pub current_step_index: u32,
    pub total_steps: u32,
    pub initiated_by: Initiator,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_terminal() {
        assert!(!ScheduleExecutionStatus::Queued.is_terminal());
        assert!(!ScheduleExecutionStatus::InProgress.is_terminal());
        assert!(ScheduleExecutionStatus::Completed.is_terminal());
        assert!(ScheduleExecutionStatus::Failed.is_terminal());
        assert!(ScheduleExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_execution_status_parse() {
        assert_eq!(
            "in_progress".parse::<ScheduleExecutionStatus>().unwrap(),
            ScheduleExecutionStatus::InProgress
        );
        assert!("running".parse::<ScheduleExecutionStatus>().is_err());
    }

    #[test]
    fn test_step_builder() {
        let step = ScheduleStep::new(2, ConnectedSystemId::new(), RunProfileId::new())
            .continue_on_failure(true);
        assert_eq!(step.step_index, 2);
        assert!(step.continue_on_failure);
        assert_eq!(step.execution_mode, ExecutionMode::Sequential);
    }
}
