//! Export pending-change engine.
//!
//! - [`ExportEvaluator`] - turns metaverse changes into pending exports
//! - [`ExportRun`] - dispatches pending exports to a connector in batches

pub mod dispatcher;
pub mod evaluator;

pub use dispatcher::{
    effective_export_parallelism, ExportDispatchOptions, ExportRun, ExportRunSummary,
    DEFAULT_EXPORT_BATCH_SIZE,
};
pub use evaluator::{ExportDecision, ExportEvaluator};
