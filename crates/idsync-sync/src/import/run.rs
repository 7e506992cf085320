//! Import run driver.
//!
//! Opens the import connection, pages through the connector, reconciles each
//! page and finishes with the reference pass and, for full imports, the
//! obsoletion sweep.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use idsync_connector::import::{ImportMode, ImportObjectTypeSelection, ImportRequest};
use idsync_connector::{ConnectorCapability, ConnectorInstance, ImportCapable};
use idsync_db::models::ConnectedSystem;
use idsync_db::SyncStore;

use crate::error::{SyncError, SyncResult};
use crate::import::reconciler::ImportReconciler;
use crate::import::references::{resolve_references, ResolutionSummary};
use crate::statistics::StatisticsTracker;

/// Default number of objects requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Summary of a finished import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRunSummary {
    pub pages: u32,
    pub objects: u32,
    pub obsoleted_by_sweep: u32,
    pub references: ResolutionSummary,
    pub persisted_connector_data: Option<String>,
}

/// One full or delta import of a connected system.
pub struct ImportRun {
    store: Arc<dyn SyncStore>,
    connector: ConnectorInstance,
    system: ConnectedSystem,
    mode: ImportMode,
    page_size: u32,
    partition: Option<String>,
    stats: Arc<StatisticsTracker>,
}

impl ImportRun {
    pub fn new(
        store: Arc<dyn SyncStore>,
        connector: ConnectorInstance,
        system: ConnectedSystem,
        mode: ImportMode,
        stats: Arc<StatisticsTracker>,
    ) -> Self {
        Self {
            store,
            connector,
            system,
            mode,
            page_size: DEFAULT_PAGE_SIZE,
            partition: None,
            stats,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Restrict the import to a partition, by external id.
    #[must_use]
    pub fn with_partition(mut self, partition: Option<String>) -> Self {
        self.partition = partition;
        self
    }

    fn required_capability(&self) -> ConnectorCapability {
        match self.mode {
            ImportMode::Full => ConnectorCapability::SupportsFullImport,
            ImportMode::Delta => ConnectorCapability::SupportsDeltaImport,
        }
    }

    fn request(&self) -> ImportRequest {
        ImportRequest {
            mode: self.mode,
            object_types: self
                .system
                .selected_object_types()
                .map(|t| ImportObjectTypeSelection {
                    name: t.name.clone(),
                    attributes: t
                        .attributes
                        .iter()
                        .filter(|a| a.selected)
                        .map(|a| a.name.clone())
                        .collect(),
                })
                .collect(),
            partition: self.partition.clone(),
            page_size: self.page_size,
            pagination_tokens: Vec::new(),
            persisted_connector_data: self.system.persisted_connector_data.clone(),
        }
    }

    /// Execute the run.
    ///
    /// A failure to open the connection, a connector error or cancellation
    /// returns `Err`; in that case nothing is swept and the persisted
    /// connector data is left as it was.
    #[instrument(skip(self, cancel), fields(system = %self.system.name, mode = %self.mode))]
    pub async fn execute(&self, cancel: &CancellationToken) -> SyncResult<ImportRunSummary> {
        let import = self.connector.import(self.required_capability())?;

        if let Err(e) = import
            .open_import_connection(&self.system.setting_values)
            .await
        {
            error!(error = %e, "Failed to open import connection");
            return Err(e.into());
        }

        let mut reconciler =
            ImportReconciler::new(self.store.clone(), self.system.clone(), self.stats.clone());
        let paged = self.run_pages(import.as_ref(), &mut reconciler, cancel).await;

        if let Err(e) = import.close_import_connection().await {
            warn!(error = %e, "Failed to close import connection");
        }
        let mut summary = paged?;

        summary.references =
            resolve_references(self.store.as_ref(), self.system.id, &self.stats).await?;

        // Objects outside the partition were never requested.
        match (self.mode, &self.partition) {
            (ImportMode::Full, None) => {
                summary.obsoleted_by_sweep = reconciler.sweep_obsolete().await?;
            }
            (ImportMode::Full, Some(partition)) => {
                debug!(%partition, "Partition-scoped full import, skipping obsoletion sweep");
            }
            (ImportMode::Delta, _) => {}
        }

        if summary.persisted_connector_data.is_some()
            && summary.persisted_connector_data != self.system.persisted_connector_data
        {
            self.store
                .update_persisted_connector_data(
                    self.system.id,
                    summary.persisted_connector_data.clone(),
                )
                .await?;
        }

        info!(
            pages = summary.pages,
            objects = summary.objects,
            obsoleted = summary.obsoleted_by_sweep,
            "Import run complete"
        );
        Ok(summary)
    }

    async fn run_pages(
        &self,
        import: &dyn ImportCapable,
        reconciler: &mut ImportReconciler,
        cancel: &CancellationToken,
    ) -> SyncResult<ImportRunSummary> {
        let mut request = self.request();
        let mut summary = ImportRunSummary::default();

        loop {
            if cancel.is_cancelled() {
                info!(pages = summary.pages, "Import cancelled");
                return Err(SyncError::Cancelled);
            }

            let page = import.import(&request, cancel).await?;
            summary.pages += 1;
            summary.objects += page.objects.len() as u32;
            debug!(
                page = summary.pages,
                objects = page.objects.len(),
                more = page.more_to_import,
                "Received import page"
            );

            if page.persisted_connector_data.is_some() {
                summary.persisted_connector_data = page.persisted_connector_data.clone();
            }
            reconciler.process_page(page.objects).await?;

            if !page.more_to_import {
                break;
            }
            request.pagination_tokens = page.pagination_tokens;
        }
        Ok(summary)
    }
}
