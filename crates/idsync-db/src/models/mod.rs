//! Data model of the synchronisation engine.

pub mod activity;
pub mod attribute;
pub mod connected_system;
pub mod connected_system_object;
pub mod initiator;
pub mod metaverse;
pub mod pending_export;
pub mod schedule;
pub mod sync_rule;
pub mod worker_task;

pub use activity::{
    Activity, ActivityObjectError, ActivityStatus, ObjectErrorType, RunStatistics,
};
pub use attribute::{
    normalize_external_id, AttributeDataType, AttributePlurality, AttributeValue, CsoReference,
    CsoValue, ImportValue, MetaverseValue, ReferenceKey, StoredAttributeValue, ValueSetChange,
};
pub use connected_system::{
    ConnectedSystem, ConnectedSystemAttribute, ConnectedSystemContainer,
    ConnectedSystemObjectType, ConnectedSystemPartition, RunProfile, RunType, SettingValue,
};
pub use connected_system_object::{
    ConnectedSystemObject, ConnectedSystemObjectAttributeValue, ConnectedSystemObjectStatus,
    ConnectedSystemObjectUpdate, CsoAttributeChange, JoinType, ReferenceResolution,
    UnresolvedReference,
};
pub use initiator::Initiator;
pub use metaverse::{
    MetaverseAttribute, MetaverseAttributeChange, MetaverseAttributeValue, MetaverseObject,
    MetaverseObjectType,
};
pub use pending_export::{
    AttributeChangeType, PendingExport, PendingExportAttributeChange, PendingExportChangeType,
};
pub use schedule::{
    ExecutionMode, Schedule, ScheduleExecution, ScheduleExecutionStatus, ScheduleStep,
};
pub use sync_rule::{
    MappingSource, MappingTarget, ObjectMatchingRule, SyncRule, SyncRuleDirection,
    SyncRuleMapping, SyncRuleMappingSource,
};
pub use worker_task::{WorkerTask, WorkerTaskStatus};
