//! # Metrics and Monitoring
//!
//! Counters for the storage engine. Cheap to clone, lock-free to update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Write metrics
    puts: AtomicU64,
    bytes_written: AtomicU64,

    // Read metrics
    gets: AtomicU64,
    get_hits: AtomicU64,

    // Background metrics
    memtable_freezes: AtomicU64,
    sst_flushes: AtomicU64,
    compactions: AtomicU64,
    bytes_compacted: AtomicU64,
    flush_errors: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a put of `bytes` key+value bytes
    pub fn record_put(&self, bytes: u64) {
        self.inner.puts.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a point lookup
    pub fn record_get(&self, hit: bool) {
        self.inner.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.inner.get_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record memtable freeze
    pub fn record_freeze(&self) {
        self.inner.memtable_freezes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a memtable turned into an SST
    pub fn record_flush(&self) {
        self.inner.sst_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record compaction
    pub fn record_compaction(&self, bytes: u64) {
        self.inner.compactions.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_compacted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_flush_error(&self) {
        self.inner.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            puts: self.inner.puts.load(Ordering::Relaxed),
            bytes_written: self.inner.bytes_written.load(Ordering::Relaxed),
            gets: self.inner.gets.load(Ordering::Relaxed),
            get_hits: self.inner.get_hits.load(Ordering::Relaxed),
            memtable_freezes: self.inner.memtable_freezes.load(Ordering::Relaxed),
            sst_flushes: self.inner.sst_flushes.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
            bytes_compacted: self.inner.bytes_compacted.load(Ordering::Relaxed),
            flush_errors: self.inner.flush_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub puts: u64,
    pub bytes_written: u64,
    pub gets: u64,
    pub get_hits: u64,
    pub memtable_freezes: u64,
    pub sst_flushes: u64,
    pub compactions: u64,
    pub bytes_compacted: u64,
    pub flush_errors: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Start new timer
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and log duration
    pub fn stop(self) -> Duration {
        let duration = self.elapsed();
        tracing::debug!(
            name = self.name,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}
