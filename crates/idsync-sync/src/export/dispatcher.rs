//! Export dispatch.
//!
//! Sends the pending exports of one connected system to its connector in
//! batches, with up to `max_parallelism` batches in flight. Every object's
//! result is applied on its own: a failed object never blocks its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use idsync_connector::export::ExportObjectResult;
use idsync_connector::{
    ConnectorCapabilities, ConnectorCapability, ConnectorError, ConnectorInstance, ExportCapable,
};
use idsync_core::{AttributeId, PendingExportId};
use idsync_db::models::{
    ActivityObjectError, AttributeChangeType, AttributeDataType, AttributeValue, ConnectedSystem,
    ConnectedSystemObjectStatus, ConnectedSystemObjectUpdate, CsoValue, ObjectErrorType,
    PendingExport, PendingExportChangeType,
};
use idsync_db::{StoreError, SyncStore};

use crate::error::{SyncError, SyncResult};
use crate::statistics::{Counter, StatisticsTracker};
use crate::values::{clean_values, diff_value_set};

/// Default number of pending exports per batch.
pub const DEFAULT_EXPORT_BATCH_SIZE: usize = 100;

/// Effective export parallelism of a system.
///
/// The configured maximum only applies when the connector declares
/// `SupportsParallelExport` and the value is greater than one. An unset
/// maximum always means one batch at a time.
#[must_use]
pub fn effective_export_parallelism(
    system: &ConnectedSystem,
    capabilities: &ConnectorCapabilities,
) -> usize {
    match system.max_export_parallelism {
        Some(max)
            if max > 1 && capabilities.supports(ConnectorCapability::SupportsParallelExport) =>
        {
            max as usize
        }
        _ => 1,
    }
}

/// Options of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDispatchOptions {
    pub batch_size: usize,
    pub max_parallelism: usize,
    /// Keep dispatching new batches after an object failed.
    pub continue_on_failure: bool,
}

impl Default for ExportDispatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_EXPORT_BATCH_SIZE,
            max_parallelism: 1,
            continue_on_failure: true,
        }
    }
}

/// Summary of a finished export run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRunSummary {
    pub batches: u32,
    pub exported: u32,
    pub failed: u32,
    /// Batches never sent because the run halted or was cancelled.
    pub skipped_batches: u32,
    /// A failure stopped dispatching.
    pub halted: bool,
    pub created_containers: Vec<String>,
}

enum BatchOutcome {
    Skipped,
    Sent {
        batch: Vec<PendingExport>,
        result: Result<Vec<ExportObjectResult>, ConnectorError>,
    },
}

/// One export run against a connected system.
pub struct ExportRun {
    store: Arc<dyn SyncStore>,
    connector: ConnectorInstance,
    system: ConnectedSystem,
    options: ExportDispatchOptions,
    stats: Arc<StatisticsTracker>,
}

impl ExportRun {
    pub fn new(
        store: Arc<dyn SyncStore>,
        connector: ConnectorInstance,
        system: ConnectedSystem,
        options: ExportDispatchOptions,
        stats: Arc<StatisticsTracker>,
    ) -> Self {
        Self {
            store,
            connector,
            system,
            options: ExportDispatchOptions {
                batch_size: options.batch_size.max(1),
                max_parallelism: options.max_parallelism.max(1),
                ..options
            },
            stats,
        }
    }

    /// Execute the run.
    #[instrument(skip(self, cancel), fields(system = %self.system.name, parallelism = self.options.max_parallelism))]
    pub async fn execute(&self, cancel: &CancellationToken) -> SyncResult<ExportRunSummary> {
        let export = self.connector.export()?;

        if let Err(e) = export
            .open_export_connection(&self.system.setting_values)
            .await
        {
            error!(error = %e, "Failed to open export connection");
            return Err(e.into());
        }

        let dispatched = self.dispatch(export.as_ref(), cancel).await;

        if let Err(e) = export.close_export_connection().await {
            warn!(error = %e, "Failed to close export connection");
        }
        let mut summary = dispatched?;

        summary.created_containers = export.created_container_dns();
        for container in &summary.created_containers {
            info!(container = %container, "Connector created container");
        }

        info!(
            batches = summary.batches,
            exported = summary.exported,
            failed = summary.failed,
            halted = summary.halted,
            "Export run complete"
        );
        Ok(summary)
    }

    async fn dispatch(
        &self,
        export: &dyn ExportCapable,
        cancel: &CancellationToken,
    ) -> SyncResult<ExportRunSummary> {
        let pending = self.store.list_pending_exports(self.system.id).await?;
        let mut summary = ExportRunSummary::default();
        if pending.is_empty() {
            debug!("No pending exports");
            return Ok(summary);
        }

        let batches: Vec<Vec<PendingExport>> = pending
            .chunks(self.options.batch_size)
            .map(<[PendingExport]>::to_vec)
            .collect();
        debug!(
            pending = pending.len(),
            batches = batches.len(),
            "Dispatching pending exports"
        );

        let halt = AtomicBool::new(false);
        let mut cancelled = false;
        let mut outcomes = stream::iter(batches)
            .map(|batch| {
                let halt = &halt;
                async move {
                    if halt.load(Ordering::SeqCst) || cancel.is_cancelled() {
                        return BatchOutcome::Skipped;
                    }
                    let result = export.export(&batch, cancel).await;
                    BatchOutcome::Sent { batch, result }
                }
            })
            .buffer_unordered(self.options.max_parallelism);

        while let Some(outcome) = outcomes.next().await {
            let failed_before = summary.failed;
            match outcome {
                BatchOutcome::Skipped => summary.skipped_batches += 1,
                BatchOutcome::Sent { batch, result } => {
                    summary.batches += 1;
                    match result {
                        Ok(results) => self.apply_results(batch, results, &mut summary).await?,
                        Err(ConnectorError::Cancelled) => {
                            cancelled = true;
                            halt.store(true, Ordering::SeqCst);
                        }
                        Err(e) => {
                            warn!(error = %e, size = batch.len(), "Export batch failed");
                            for pending in &batch {
                                self.record_failure(pending, &e.to_string(), &mut summary)
                                    .await?;
                            }
                        }
                    }
                }
            }

            if summary.failed > failed_before && !self.options.continue_on_failure {
                summary.halted = true;
                halt.store(true, Ordering::SeqCst);
            }
        }

        if cancelled || (cancel.is_cancelled() && summary.skipped_batches > 0) {
            info!(
                exported = summary.exported,
                skipped_batches = summary.skipped_batches,
                "Export cancelled"
            );
            return Err(SyncError::Cancelled);
        }
        if summary.halted {
            warn!(
                failed = summary.failed,
                skipped_batches = summary.skipped_batches,
                "Export halted after a failure"
            );
        }
        Ok(summary)
    }

    async fn apply_results(
        &self,
        batch: Vec<PendingExport>,
        results: Vec<ExportObjectResult>,
        summary: &mut ExportRunSummary,
    ) -> SyncResult<()> {
        let mut by_id: HashMap<PendingExportId, ExportObjectResult> = results
            .into_iter()
            .map(|r| (r.pending_export_id, r))
            .collect();

        for pending in batch {
            match by_id.remove(&pending.id) {
                Some(result) if result.is_success() => {
                    match self.apply_success(&pending, result.external_id.as_deref()).await {
                        Ok(()) => {
                            summary.exported += 1;
                            self.stats.record(Counter::Exported);
                        }
                        Err(SyncError::Store(StoreError::Conflict(message))) => {
                            self.record_failure(&pending, &message, summary).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(result) => {
                    let message = result.error.unwrap_or_default();
                    self.record_failure(&pending, &message, summary).await?;
                }
                None => {
                    self.record_failure(&pending, "Connector returned no result", summary)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Apply an exported change to the CSO and drop the pending export.
    async fn apply_success(
        &self,
        pending: &PendingExport,
        assigned_external_id: Option<&str>,
    ) -> SyncResult<()> {
        let Some(cso) = self.store.get_cso(pending.connected_system_object_id).await? else {
            warn!(cso_id = %pending.connected_system_object_id, "Exported object no longer exists");
            self.store.delete_pending_export(pending.id).await?;
            return Ok(());
        };

        let mut desired: HashMap<AttributeId, Vec<CsoValue>> = HashMap::new();
        for change in &pending.attribute_changes {
            let values = desired.entry(change.attribute_id).or_insert_with(|| {
                cso.values_of(change.attribute_id)
                    .map(|v| v.value.clone())
                    .collect()
            });
            match change.change_type {
                AttributeChangeType::Add => {
                    if !values.contains(&change.value) {
                        values.push(change.value.clone());
                    }
                }
                AttributeChangeType::Remove => values.retain(|v| v != &change.value),
            }
        }

        if let Some(external_id) = assigned_external_id {
            if cso.first_value(cso.external_id_attribute_id).is_none() {
                let data_type = self
                    .system
                    .attribute(cso.external_id_attribute_id)
                    .map(|a| a.data_type)
                    .unwrap_or(AttributeDataType::Text);
                desired.insert(
                    cso.external_id_attribute_id,
                    vec![external_id_value(external_id, data_type)],
                );
            }
        }

        let attribute_changes = desired
            .into_iter()
            .map(|(attribute_id, values)| {
                diff_value_set(
                    attribute_id,
                    cso.values_of(attribute_id),
                    clean_values(values.into_iter().map(Some)),
                )
            })
            .filter(|c| !c.is_empty())
            .collect();
        let status = (cso.status == ConnectedSystemObjectStatus::PendingProvisioning)
            .then_some(ConnectedSystemObjectStatus::Normal);

        self.store
            .apply_cso_update(cso.id, ConnectedSystemObjectUpdate { status, attribute_changes })
            .await?;
        self.store.delete_pending_export(pending.id).await?;

        if pending.change_type == PendingExportChangeType::Create {
            info!(
                cso_id = %cso.id,
                external_id = assigned_external_id.or(pending.external_id.as_deref()).unwrap_or(""),
                "Provisioned object confirmed"
            );
        } else {
            debug!(cso_id = %cso.id, "Exported update applied");
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        pending: &PendingExport,
        message: &str,
        summary: &mut ExportRunSummary,
    ) -> SyncResult<()> {
        warn!(
            pending_export_id = %pending.id,
            cso_id = %pending.connected_system_object_id,
            error = %message,
            "Pending export failed"
        );
        self.store
            .record_pending_export_failure(pending.id, message, Utc::now())
            .await?;
        summary.failed += 1;
        self.stats.record(Counter::ExportErrors);

        let mut object_error = ActivityObjectError::new(ObjectErrorType::Export, message)
            .with_object_type(&pending.object_type_name)
            .with_cso(pending.connected_system_object_id);
        if let Some(external_id) = &pending.external_id {
            object_error = object_error.with_external_id(external_id);
        }
        self.stats.record_object_error(object_error);
        Ok(())
    }
}

/// Type a connector-assigned external id like its attribute.
fn external_id_value(raw: &str, data_type: AttributeDataType) -> CsoValue {
    match data_type {
        AttributeDataType::Guid => Uuid::parse_str(raw.trim_start_matches('{').trim_end_matches('}'))
            .map(AttributeValue::Guid)
            .unwrap_or_else(|_| AttributeValue::Text(raw.to_string())),
        AttributeDataType::Number => raw
            .parse()
            .map(AttributeValue::Number)
            .unwrap_or_else(|_| AttributeValue::Text(raw.to_string())),
        AttributeDataType::LongNumber => raw
            .parse()
            .map(AttributeValue::LongNumber)
            .unwrap_or_else(|_| AttributeValue::Text(raw.to_string())),
        _ => AttributeValue::Text(raw.to_string()),
    }
}
