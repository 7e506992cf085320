//! Run statistics tracking.
//!
//! A run shares one tracker between the components it drives; the activity
//! receives a snapshot when the run ends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use idsync_db::models::{ActivityObjectError, RunStatistics};

/// Counter of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Added,
    Updated,
    Obsoleted,
    Unchanged,
    Projected,
    Joined,
    Disconnected,
    AttributeFlows,
    PendingExportsCreated,
    Exported,
    ExportErrors,
    ReferencesResolved,
}

/// Thread-safe tracker for accumulating statistics during a run.
pub struct StatisticsTracker {
    added: AtomicU32,
    updated: AtomicU32,
    obsoleted: AtomicU32,
    unchanged: AtomicU32,
    projected: AtomicU32,
    joined: AtomicU32,
    disconnected: AtomicU32,
    attribute_flows: AtomicU32,
    pending_exports_created: AtomicU32,
    exported: AtomicU32,
    export_errors: AtomicU32,
    references_resolved: AtomicU32,
    unresolved_references: AtomicU32,
    object_errors: RwLock<Vec<ActivityObjectError>>,
    start_time: Instant,
}

impl StatisticsTracker {
    /// Create a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            added: AtomicU32::new(0),
            updated: AtomicU32::new(0),
            obsoleted: AtomicU32::new(0),
            unchanged: AtomicU32::new(0),
            projected: AtomicU32::new(0),
            joined: AtomicU32::new(0),
            disconnected: AtomicU32::new(0),
            attribute_flows: AtomicU32::new(0),
            pending_exports_created: AtomicU32::new(0),
            exported: AtomicU32::new(0),
            export_errors: AtomicU32::new(0),
            references_resolved: AtomicU32::new(0),
            unresolved_references: AtomicU32::new(0),
            object_errors: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    fn counter(&self, counter: Counter) -> &AtomicU32 {
        match counter {
            Counter::Added => &self.added,
            Counter::Updated => &self.updated,
            Counter::Obsoleted => &self.obsoleted,
            Counter::Unchanged => &self.unchanged,
            Counter::Projected => &self.projected,
            Counter::Joined => &self.joined,
            Counter::Disconnected => &self.disconnected,
            Counter::AttributeFlows => &self.attribute_flows,
            Counter::PendingExportsCreated => &self.pending_exports_created,
            Counter::Exported => &self.exported,
            Counter::ExportErrors => &self.export_errors,
            Counter::ReferencesResolved => &self.references_resolved,
        }
    }

    /// Increment a counter by one.
    pub fn record(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Increment a counter.
    pub fn add(&self, counter: Counter, count: u32) {
        self.counter(counter).fetch_add(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn count(&self, counter: Counter) -> u32 {
        self.counter(counter).load(Ordering::SeqCst)
    }

    /// References still unresolved after the last resolution pass.
    pub fn set_unresolved_references(&self, count: u32) {
        self.unresolved_references.store(count, Ordering::SeqCst);
    }

    /// Record a per-object failure.
    pub fn record_object_error(&self, error: ActivityObjectError) {
        if let Ok(mut errors) = self.object_errors.write() {
            errors.push(error);
        }
    }

    #[must_use]
    pub fn object_error_count(&self) -> u32 {
        self.object_errors
            .read()
            .map(|errors| errors.len() as u32)
            .unwrap_or(0)
    }

    /// Drain the recorded object errors.
    pub fn take_object_errors(&self) -> Vec<ActivityObjectError> {
        self.object_errors
            .write()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }

    /// Get elapsed duration in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Snapshot current statistics.
    pub fn snapshot(&self) -> RunStatistics {
        RunStatistics {
            objects_added: self.count(Counter::Added),
            objects_updated: self.count(Counter::Updated),
            objects_obsoleted: self.count(Counter::Obsoleted),
            objects_unchanged: self.count(Counter::Unchanged),
            object_errors: self.object_error_count(),
            objects_projected: self.count(Counter::Projected),
            objects_joined: self.count(Counter::Joined),
            objects_disconnected: self.count(Counter::Disconnected),
            attribute_flows: self.count(Counter::AttributeFlows),
            pending_exports_created: self.count(Counter::PendingExportsCreated),
            objects_exported: self.count(Counter::Exported),
            export_errors: self.count(Counter::ExportErrors),
            references_resolved: self.count(Counter::ReferencesResolved),
            unresolved_references: self.unresolved_references.load(Ordering::SeqCst),
            duration_ms: self.elapsed_ms(),
        }
    }
}

impl Default for StatisticsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_db::models::ObjectErrorType;

    #[test]
    fn test_statistics_tracker_counts() {
        let tracker = StatisticsTracker::new();
        tracker.record(Counter::Added);
        tracker.record(Counter::Added);
        tracker.add(Counter::Obsoleted, 3);
        tracker.set_unresolved_references(2);

        let stats = tracker.snapshot();
        assert_eq!(stats.objects_added, 2);
        assert_eq!(stats.objects_obsoleted, 3);
        assert_eq!(stats.unresolved_references, 2);
        assert_eq!(stats.objects_updated, 0);
    }

    #[test]
    fn test_object_errors_are_counted_and_drained() {
        let tracker = StatisticsTracker::new();
        tracker.record_object_error(ActivityObjectError::new(
            ObjectErrorType::MissingExternalId,
            "no external id",
        ));
        assert_eq!(tracker.snapshot().object_errors, 1);

        let errors = tracker.take_object_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(tracker.object_error_count(), 0);
    }

    #[test]
    fn test_concurrent_recording() {
        let tracker = std::sync::Arc::new(StatisticsTracker::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.record(Counter::Exported);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.count(Counter::Exported), 400);
    }
}
