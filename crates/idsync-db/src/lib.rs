//! # idsync-db
//!
//! Data model and store contract of the idsync engine.
//!
//! Persistence is abstracted behind the repository traits in [`repository`];
//! [`MemoryStore`] is the reference implementation used by the worker binary
//! and the tests.

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use repository::{
    ActivityRepository, AppliedExecutionChange, ConnectedSystemObjectRepository,
    ConnectedSystemRepository, ExecutionChangeSet, MetaverseRepository, PendingExportRepository,
    ScheduleRepository, SyncRuleRepository, SyncStore, TaskTransition, TaskTransitionAction,
    WorkerTaskRepository,
};
