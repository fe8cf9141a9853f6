use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct EngineMetrics {
    documents_ingested: AtomicU64,
    units_indexed: AtomicU64,
    queries_answered: AtomicU64,
}

impl EngineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed ingestion and the number of units it indexed.
    pub fn record_ingestion(&self, unit_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.units_indexed.fetch_add(unit_count, Ordering::Relaxed);
    }

    /// Record an answered query.
    pub fn record_query(&self) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            units_indexed: self.units_indexed.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of engine counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents ingested to completion since startup.
    pub documents_ingested: u64,
    /// Total content units indexed across all completed documents.
    pub units_indexed: u64,
    /// Number of queries answered since startup.
    pub queries_answered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_ingestions_and_units() {
        let metrics = EngineMetrics::new();
        metrics.record_ingestion(4);
        metrics.record_ingestion(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.units_indexed, 6);
        assert_eq!(snapshot.queries_answered, 0);
    }

    #[test]
    fn records_queries() {
        let metrics = EngineMetrics::new();
        metrics.record_query();
        metrics.record_query();
        assert_eq!(metrics.snapshot().queries_answered, 2);
    }
}
