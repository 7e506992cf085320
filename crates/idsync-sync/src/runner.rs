//! Run profile execution.
//!
//! Resolves a worker task to its connected system and run profile, drives the
//! matching import, synchronisation or export run and records the outcome as
//! an [`Activity`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use idsync_connector::import::ImportMode;
use idsync_connector::ConnectorRegistry;
use idsync_db::models::{
    Activity, ActivityStatus, ConnectedSystem, RunProfile, RunType, WorkerTask,
};
use idsync_db::SyncStore;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::export::{effective_export_parallelism, ExportDispatchOptions, ExportRun};
use crate::flow::{SyncMode, SyncRun};
use crate::import::ImportRun;
use crate::rules::ExpressionEngine;
use crate::scheduler::TaskOutcome;
use crate::statistics::StatisticsTracker;

/// Executes the run profile behind a worker task.
pub struct RunProfileExecutor {
    store: Arc<dyn SyncStore>,
    registry: Arc<ConnectorRegistry>,
    expressions: Arc<ExpressionEngine>,
    config: SyncConfig,
}

impl RunProfileExecutor {
    pub fn new(
        store: Arc<dyn SyncStore>,
        registry: Arc<ConnectorRegistry>,
        expressions: Arc<ExpressionEngine>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            registry,
            expressions,
            config,
        }
    }

    /// Run a task and return its finished activity.
    ///
    /// Run failures end up in the activity. `Err` is returned only when the
    /// task cannot be resolved or the activity cannot be written.
    #[instrument(skip(self, task, cancel), fields(task_id = %task.id))]
    pub async fn execute(
        &self,
        task: &WorkerTask,
        cancel: &CancellationToken,
    ) -> SyncResult<Activity> {
        let system = self
            .store
            .get_connected_system(task.connected_system_id)
            .await?
            .ok_or_else(|| SyncError::not_found("Connected system", task.connected_system_id))?;
        let profile = system
            .run_profile(task.run_profile_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("Run profile", task.run_profile_id))?;

        let mut activity = Activity::start(
            system.id,
            Some(profile.id),
            Some(profile.run_type),
            task.initiated_by,
        );
        activity.worker_task_id = Some(task.id);
        self.store.create_activity(activity.clone()).await?;
        self.link_activity(task, &activity).await?;

        info!(
            system = %system.name,
            run_profile = %profile.name,
            run_type = %profile.run_type,
            activity_id = %activity.id,
            "Run started"
        );

        let stats = Arc::new(StatisticsTracker::new());
        let result = self.run(task, &system, &profile, &stats, cancel).await;

        activity.statistics = stats.snapshot();
        activity.object_errors = stats.take_object_errors();
        let status = match result {
            Ok(()) => ActivityStatus::Complete,
            Err(e) if e.is_cancelled() => {
                info!(activity_id = %activity.id, "Run cancelled");
                activity.error_message = Some(e.to_string());
                ActivityStatus::Cancelled
            }
            Err(e) => {
                error!(activity_id = %activity.id, error = %e, "Run failed");
                activity.error_message = Some(e.to_string());
                ActivityStatus::FailedWithError
            }
        };
        activity.finish(status);
        self.store.update_activity(activity.clone()).await?;

        info!(
            activity_id = %activity.id,
            status = %activity.status,
            changes = activity.statistics.total_changes(),
            object_errors = activity.statistics.object_errors,
            duration_ms = activity.statistics.duration_ms,
            "Run finished"
        );
        Ok(activity)
    }

    async fn link_activity(&self, task: &WorkerTask, activity: &Activity) -> SyncResult<()> {
        let Some(current) = self.store.get_worker_task(task.id).await? else {
            // Ad-hoc callers may run a task that was never stored.
            return Ok(());
        };
        let expected = current.status;
        let linked = WorkerTask {
            activity_id: Some(activity.id),
            ..current
        };
        if !self.store.update_worker_task_if(linked, expected).await? {
            debug!(task_id = %task.id, "Task changed while linking its activity");
        }
        Ok(())
    }

    async fn run(
        &self,
        task: &WorkerTask,
        system: &ConnectedSystem,
        profile: &RunProfile,
        stats: &Arc<StatisticsTracker>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        match profile.run_type {
            RunType::FullImport | RunType::DeltaImport => {
                let mode = if profile.run_type == RunType::FullImport {
                    ImportMode::Full
                } else {
                    ImportMode::Delta
                };
                let partition = match profile.partition_id {
                    Some(id) => Some(
                        system
                            .partition(id)
                            .ok_or_else(|| SyncError::not_found("Partition", id))?
                            .external_id
                            .clone(),
                    ),
                    None => None,
                };
                let connector = self.registry.create(system)?;
                let summary = ImportRun::new(
                    self.store.clone(),
                    connector,
                    system.clone(),
                    mode,
                    stats.clone(),
                )
                .with_page_size(profile.page_size.unwrap_or(self.config.import_page_size))
                .with_partition(partition)
                .execute(cancel)
                .await?;
                debug!(
                    pages = summary.pages,
                    objects = summary.objects,
                    obsoleted = summary.obsoleted_by_sweep,
                    "Import summary"
                );
            }
            RunType::FullSynchronisation | RunType::DeltaSynchronisation => {
                let mode = if profile.run_type == RunType::FullSynchronisation {
                    SyncMode::Full
                } else {
                    SyncMode::Delta
                };
                let summary = SyncRun::new(
                    self.store.clone(),
                    system.clone(),
                    mode,
                    self.expressions.clone(),
                    stats.clone(),
                )
                .execute(cancel)
                .await?;
                debug!(
                    processed = summary.processed,
                    changed_mvos = summary.changed_mvos,
                    pending_exports = summary.pending_exports,
                    "Synchronisation summary"
                );
            }
            RunType::Export => {
                let connector = self.registry.create(system)?;
                let capabilities = connector.connector().capabilities();
                let options = ExportDispatchOptions {
                    batch_size: self.config.export_batch_size,
                    max_parallelism: effective_export_parallelism(system, &capabilities),
                    continue_on_failure: task.continue_on_failure,
                };
                let summary = ExportRun::new(
                    self.store.clone(),
                    connector,
                    system.clone(),
                    options,
                    stats.clone(),
                )
                .execute(cancel)
                .await?;
                if summary.halted {
                    warn!(
                        failed = summary.failed,
                        skipped_batches = summary.skipped_batches,
                        "Export halted after a failure"
                    );
                    return Err(SyncError::invalid_state(format!(
                        "Export halted after {} failed object(s)",
                        summary.failed
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Task outcome of a finished activity.
#[must_use]
pub fn task_outcome(activity: &Activity) -> TaskOutcome {
    match activity.status {
        ActivityStatus::Complete | ActivityStatus::CompleteWithWarning => TaskOutcome::Completed,
        ActivityStatus::Cancelled => TaskOutcome::Cancelled,
        ActivityStatus::FailedWithError | ActivityStatus::InProgress => TaskOutcome::Failed(
            activity
                .error_message
                .clone()
                .unwrap_or_else(|| format!("Activity ended with status {}", activity.status)),
        ),
    }
}
