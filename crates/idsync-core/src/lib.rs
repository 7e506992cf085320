//! idsync Core Library
//!
//! Shared types for the idsync identity synchronization engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers for every persisted entity
//! - [`error`] - Standardized error type (`IdsyncError`)
//!
//! # Example
//!
//! ```
//! use idsync_core::{ConnectedSystemId, IdsyncError, Result};
//!
//! fn find_system(id: ConnectedSystemId) -> Result<()> {
//!     Err(IdsyncError::not_found("ConnectedSystem", id))
//! }
//!
//! assert!(find_system(ConnectedSystemId::new()).is_err());
//! ```

pub mod error;
pub mod ids;

pub use error::{IdsyncError, Result};
pub use ids::{
    ActivityId, AttributeId, AttributeValueId, ConnectedSystemId, ConnectedSystemObjectId,
    MetaverseAttributeId, MetaverseObjectId, MetaverseObjectTypeId, ObjectTypeId, ParseIdError,
    PartitionId, PendingExportId, RunProfileId, ScheduleExecutionId, ScheduleId, ScheduleStepId,
    SyncRuleId, SyncRuleMappingId, WorkerTaskId,
};
