//! # Metrics and Monitoring
//!
//! Provides metrics collection for observing a KaguraDB instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Mutation metrics
    documents_inserted: AtomicU64,
    documents_updated: AtomicU64,
    documents_deleted: AtomicU64,

    // Query metrics
    queries_executed: AtomicU64,
    query_errors: AtomicU64,
    equality_lookups: AtomicU64,
    range_scans: AtomicU64,
    full_scans: AtomicU64,

    // Index metrics
    index_builds: AtomicU64,
    index_rollbacks: AtomicU64,

    // Persistence metrics
    snapshots_saved: AtomicU64,
    snapshots_loaded: AtomicU64,

    // System metrics
    memory_usage: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                documents_inserted: AtomicU64::new(0),
                documents_updated: AtomicU64::new(0),
                documents_deleted: AtomicU64::new(0),
                queries_executed: AtomicU64::new(0),
                query_errors: AtomicU64::new(0),
                equality_lookups: AtomicU64::new(0),
                range_scans: AtomicU64::new(0),
                full_scans: AtomicU64::new(0),
                index_builds: AtomicU64::new(0),
                index_rollbacks: AtomicU64::new(0),
                snapshots_saved: AtomicU64::new(0),
                snapshots_loaded: AtomicU64::new(0),
                memory_usage: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_insert(&self) {
        self.inner.documents_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update(&self, count: u64) {
        self.inner.documents_updated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delete(&self, count: u64) {
        self.inner.documents_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.inner.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_error(&self) {
        self.inner.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_equality_lookup(&self) {
        self.inner.equality_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_range_scan(&self) {
        self.inner.range_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_scan(&self) {
        self.inner.full_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_build(&self) {
        self.inner.index_builds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_rollback(&self) {
        self.inner.index_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_save(&self) {
        self.inner.snapshots_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_load(&self) {
        self.inner.snapshots_loaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_memory(&self, bytes: u64) {
        self.inner.memory_usage.store(bytes, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_inserted: self.inner.documents_inserted.load(Ordering::Relaxed),
            documents_updated: self.inner.documents_updated.load(Ordering::Relaxed),
            documents_deleted: self.inner.documents_deleted.load(Ordering::Relaxed),
            queries_executed: self.inner.queries_executed.load(Ordering::Relaxed),
            query_errors: self.inner.query_errors.load(Ordering::Relaxed),
            equality_lookups: self.inner.equality_lookups.load(Ordering::Relaxed),
            range_scans: self.inner.range_scans.load(Ordering::Relaxed),
            full_scans: self.inner.full_scans.load(Ordering::Relaxed),
            index_builds: self.inner.index_builds.load(Ordering::Relaxed),
            index_rollbacks: self.inner.index_rollbacks.load(Ordering::Relaxed),
            snapshots_saved: self.inner.snapshots_saved.load(Ordering::Relaxed),
            snapshots_loaded: self.inner.snapshots_loaded.load(Ordering::Relaxed),
            memory_usage: self.inner.memory_usage.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub documents_inserted: u64,
    pub documents_updated: u64,
    pub documents_deleted: u64,
    pub queries_executed: u64,
    pub query_errors: u64,
    pub equality_lookups: u64,
    pub range_scans: u64,
    pub full_scans: u64,
    pub index_builds: u64,
    pub index_rollbacks: u64,
    pub snapshots_saved: u64,
    pub snapshots_loaded: u64,
    pub memory_usage: u64,
}

/// Histogram over small integer observations, used for probe-sequence
/// lengths. The last bucket is open-ended.
pub struct Histogram {
    boundaries: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given inclusive upper boundaries.
    /// A final overflow bucket is added automatically.
    pub fn new(boundaries: Vec<u64>) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            boundaries,
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Boundaries suited to probe-sequence lengths: a well-behaved Robin
    /// Hood table keeps almost everything in the first few buckets.
    pub fn probe_lengths() -> Self {
        Self::new(vec![0, 1, 2, 4, 8, 16, 32])
    }

    /// Record a value
    pub fn record(&self, value: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Get histogram statistics
    pub fn stats(&self) -> HistogramStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        HistogramStats {
            count,
            sum,
            mean: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
            buckets: self
                .boundaries
                .iter()
                .copied()
                .map(Some)
                .chain(std::iter::once(None))
                .zip(self.buckets.iter().map(|b| b.load(Ordering::Relaxed)))
                .collect(),
        }
    }

    /// Drop all recorded observations.
    pub fn reset(&self) {
        for b in &self.buckets {
            b.store(0, Ordering::Relaxed);
        }
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Histogram statistics. `None` as a boundary marks the overflow bucket.
#[derive(Debug, Clone)]
pub struct HistogramStats {
    pub count: u64,
    pub sum: u64,
    pub mean: f64,
    pub buckets: Vec<(Option<u64>, u64)>,
}
