//! # idsync-sync
//!
//! The identity synchronisation engine.
//!
//! ## Architecture
//!
//! - [`import`] - Reconciles imported objects into connected system objects
//! - [`rules`] - Sync rule validation and the expression sandbox
//! - [`flow`] - Attribute flow into the metaverse (join, project, disconnect)
//! - [`export`] - Pending export evaluation and batched dispatch
//! - [`scheduler`] - Schedule executions and worker task state
//! - [`runner`], [`worker`] - Run profile execution and the polling worker
//!
//! Everything talks to persistence through [`idsync_db::SyncStore`] and to
//! connected systems through [`idsync_connector::ConnectorRegistry`].

pub mod config;
pub mod error;
pub mod export;
pub mod flow;
pub mod import;
pub mod rules;
pub mod runner;
pub mod scheduler;
pub mod statistics;
pub mod values;
pub mod worker;

pub use config::{ConfigError, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use export::{
    effective_export_parallelism, ExportDecision, ExportDispatchOptions, ExportEvaluator,
    ExportRun, ExportRunSummary,
};
pub use flow::{FlowOutcome, SyncMode, SyncRun, SyncRunSummary};
pub use import::{ImportOutcome, ImportReconciler, ImportRun, ImportRunSummary, ObjectFailure};
pub use rules::{
    check_compatibility, validate_mapping, ExpressionContext, ExpressionEngine,
    ExpressionEngineConfig, SyncRuleService,
};
pub use runner::{task_outcome, RunProfileExecutor};
pub use scheduler::{AdvanceOutcome, ScheduleOrchestrator, TaskOutcome};
pub use statistics::{Counter, StatisticsTracker};
pub use worker::{SyncWorker, WorkerConfig};
