//! Process-wide activity counters for ingestion and search.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingest and search activity.
#[derive(Default)]
pub struct ActivityMetrics {
    documents_processed: AtomicU64,
    units_embedded: AtomicU64,
    embedding_failures: AtomicU64,
    documents_published: AtomicU64,
    publish_failures: AtomicU64,
    searches_served: AtomicU64,
}

impl ActivityMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record source documents that finished extraction.
    pub fn record_documents(&self, count: u64) {
        self.documents_processed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the outcome counts of one embedding batch.
    pub fn record_embedding_batch(&self, succeeded: u64, failed: u64) {
        self.units_embedded.fetch_add(succeeded, Ordering::Relaxed);
        self.embedding_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record the outcome counts of one publish run.
    pub fn record_publish(&self, succeeded: u64, failed: u64) {
        self.documents_published
            .fetch_add(succeeded, Ordering::Relaxed);
        self.publish_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record one search served through the gateway.
    pub fn record_search(&self) {
        self.searches_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            units_embedded: self.units_embedded.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
            documents_published: self.documents_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            searches_served: self.searches_served.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of activity counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Source documents that finished extraction since startup.
    pub documents_processed: u64,
    /// Units embedded successfully since startup.
    pub units_embedded: u64,
    /// Units whose embedding attempt failed since startup.
    pub embedding_failures: u64,
    /// Documents the index accepted since startup.
    pub documents_published: u64,
    /// Documents that failed to publish since startup.
    pub publish_failures: u64,
    /// Searches served through the gateway since startup.
    pub searches_served: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_records() {
        let metrics = ActivityMetrics::new();
        metrics.record_documents(2);
        metrics.record_embedding_batch(10, 1);
        metrics.record_embedding_batch(5, 0);
        metrics.record_publish(14, 1);
        metrics.record_search();
        metrics.record_search();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_processed, 2);
        assert_eq!(snapshot.units_embedded, 15);
        assert_eq!(snapshot.embedding_failures, 1);
        assert_eq!(snapshot.documents_published, 14);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.searches_served, 2);
    }

    #[test]
    fn fresh_accumulator_snapshots_to_zero() {
        let snapshot = ActivityMetrics::new().snapshot();
        assert_eq!(snapshot.documents_processed, 0);
        assert_eq!(snapshot.units_embedded, 0);
        assert_eq!(snapshot.searches_served, 0);
    }
}
