//! Strongly Typed Identifiers
//!
//! Every persisted entity is addressed by its own UUID newtype. Cross-object
//! links (CSO to CSO references, CSO to metaverse object joins) are stored as
//! these ids and resolved through explicit lookups, never as live object
//! graphs.
//!
//! # Example
//!
//! ```
//! use idsync_core::{ConnectedSystemId, ConnectedSystemObjectId};
//!
//! let system = ConnectedSystemId::new();
//! let object = ConnectedSystemObjectId::new();
//!
//! fn requires_system(id: ConnectedSystemId) -> String {
//!     id.to_string()
//! }
//!
//! let result = requires_system(system);
//! // requires_system(object); // This would not compile!
//! # let _ = (result, object);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to define a strongly-typed ID type
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifier of a connected system (one external system).
    ConnectedSystemId
);

define_id!(
    /// Identifier of an object type within a connected system schema.
    ObjectTypeId
);

define_id!(
    /// Identifier of an attribute within a connected system object type.
    AttributeId
);

define_id!(
    /// Identifier of a connected system object (CSO).
    ConnectedSystemObjectId
);

define_id!(
    /// Identifier of one stored attribute value row.
    ///
    /// Multi-valued attributes hold one row per value; unchanged rows keep
    /// their id across imports.
    AttributeValueId
);

define_id!(
    /// Identifier of a metaverse object type.
    MetaverseObjectTypeId
);

define_id!(
    /// Identifier of a metaverse attribute.
    MetaverseAttributeId
);

define_id!(
    /// Identifier of a metaverse object (MVO).
    MetaverseObjectId
);

define_id!(
    /// Identifier of a partition of a connected system.
    PartitionId
);

define_id!(
    /// Identifier of a run profile of a connected system.
    RunProfileId
);

define_id!(
    /// Identifier of a sync rule.
    SyncRuleId
);

define_id!(
    /// Identifier of a sync rule attribute mapping.
    SyncRuleMappingId
);

define_id!(
    /// Identifier of a queued outbound change.
    PendingExportId
);

define_id!(
    /// Identifier of a schedule.
    ScheduleId
);

define_id!(
    /// Identifier of a schedule step.
    ScheduleStepId
);

define_id!(
    /// Identifier of one run of a schedule.
    ScheduleExecutionId
);

define_id!(
    /// Identifier of a worker task.
    WorkerTaskId
);

define_id!(
    /// Identifier of a run activity record.
    ActivityId
);
