//! Reference resolution pass.
//!
//! Runs after all pages of an import so references to objects that arrived
//! later in the same run resolve. Targets are looked up across every object
//! type of the connected system.

use tracing::{debug, info, warn};

use idsync_core::ConnectedSystemId;
use idsync_db::models::ReferenceResolution;
use idsync_db::SyncStore;

use crate::error::SyncResult;
use crate::statistics::{Counter, StatisticsTracker};

/// Result of one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionSummary {
    pub resolved: u32,
    pub ambiguous: u32,
    pub unresolved: u32,
}

/// Retry every unresolved reference of a system.
pub async fn resolve_references(
    store: &dyn SyncStore,
    system: ConnectedSystemId,
    stats: &StatisticsTracker,
) -> SyncResult<ResolutionSummary> {
    let pending = store.list_unresolved_references(system).await?;
    if pending.is_empty() {
        stats.set_unresolved_references(0);
        return Ok(ResolutionSummary::default());
    }

    let mut summary = ResolutionSummary::default();
    let mut resolutions = Vec::new();
    for reference in &pending {
        let candidates = store
            .find_csos_by_external_id_any_type(system, &reference.unresolved_reference_value)
            .await?;
        match candidates.as_slice() {
            [target] => resolutions.push(ReferenceResolution {
                attribute_value_id: reference.attribute_value_id,
                target: *target,
            }),
            [] => {
                debug!(
                    cso_id = %reference.connected_system_object_id,
                    value = %reference.unresolved_reference_value,
                    "Reference target not imported yet"
                );
                summary.unresolved += 1;
            }
            many => {
                warn!(
                    cso_id = %reference.connected_system_object_id,
                    value = %reference.unresolved_reference_value,
                    candidates = many.len(),
                    "Ambiguous reference left unresolved"
                );
                summary.ambiguous += 1;
                summary.unresolved += 1;
            }
        }
    }

    if !resolutions.is_empty() {
        summary.resolved = store.resolve_references(&resolutions).await?;
        stats.add(Counter::ReferencesResolved, summary.resolved);
    }
    stats.set_unresolved_references(summary.unresolved);

    info!(
        system = %system,
        resolved = summary.resolved,
        unresolved = summary.unresolved,
        "Reference resolution pass complete"
    );
    Ok(summary)
}
