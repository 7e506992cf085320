//! Import reconciliation.
//!
//! - [`ImportReconciler`] - reconciles pages of import objects into CSOs
//! - [`resolve_references`] - resolution pass over unresolved references
//! - [`ImportRun`] - drives a full or delta import against a connector

pub mod reconciler;
pub mod references;
pub mod run;

pub use reconciler::{ImportOutcome, ImportReconciler, ObjectFailure};
pub use references::{resolve_references, ResolutionSummary};
pub use run::{ImportRun, ImportRunSummary, DEFAULT_PAGE_SIZE};
