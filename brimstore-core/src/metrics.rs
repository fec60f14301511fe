//! # Metrics
//!
//! Lightweight operation counters for monitoring a running store. Cheap to
//! clone and safe to update from any worker thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct StoreMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Write path
    values_written: AtomicU64,
    value_bytes: AtomicU64,
    mem_block_flushes: AtomicU64,

    // Value log
    value_files_created: AtomicU64,
    value_log_bytes: AtomicU64,

    // Table of contents
    toc_pages_written: AtomicU64,
    toc_log_bytes: AtomicU64,

    // Read path
    reads_served: AtomicU64,
    read_errors: AtomicU64,
}

impl StoreMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                values_written: AtomicU64::new(0),
                value_bytes: AtomicU64::new(0),
                mem_block_flushes: AtomicU64::new(0),
                value_files_created: AtomicU64::new(0),
                value_log_bytes: AtomicU64::new(0),
                toc_pages_written: AtomicU64::new(0),
                toc_log_bytes: AtomicU64::new(0),
                reads_served: AtomicU64::new(0),
                read_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Record an accepted write and its payload length.
    pub fn record_value_written(&self, bytes: u64) {
        self.inner.values_written.fetch_add(1, Ordering::Relaxed);
        self.inner.value_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a memory block handed to the value-log writer.
    pub fn record_mem_block_flush(&self) {
        self.inner.mem_block_flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a newly created `.values` file.
    pub fn record_value_file_created(&self) {
        self.inner.value_files_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the final physical size of a closed `.values` file.
    pub fn record_value_log_bytes(&self, bytes: u64) {
        self.inner.value_log_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a finished TOC page.
    pub fn record_toc_page(&self) {
        self.inner.toc_pages_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the final physical size of a closed `.toc` file.
    pub fn record_toc_log_bytes(&self, bytes: u64) {
        self.inner.toc_log_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a read served to completion.
    pub fn record_read(&self) {
        self.inner.reads_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read that failed with an I/O or data error.
    pub fn record_read_error(&self) {
        self.inner.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            values_written: self.inner.values_written.load(Ordering::Relaxed),
            value_bytes: self.inner.value_bytes.load(Ordering::Relaxed),
            mem_block_flushes: self.inner.mem_block_flushes.load(Ordering::Relaxed),
            value_files_created: self.inner.value_files_created.load(Ordering::Relaxed),
            value_log_bytes: self.inner.value_log_bytes.load(Ordering::Relaxed),
            toc_pages_written: self.inner.toc_pages_written.load(Ordering::Relaxed),
            toc_log_bytes: self.inner.toc_log_bytes.load(Ordering::Relaxed),
            reads_served: self.inner.reads_served.load(Ordering::Relaxed),
            read_errors: self.inner.read_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics snapshot
#[derive(Debug, Clone)]
pub struct StoreMetricsSnapshot {
    pub values_written: u64,
    pub value_bytes: u64,
    pub mem_block_flushes: u64,
    pub value_files_created: u64,
    pub value_log_bytes: u64,
    pub toc_pages_written: u64,
    pub toc_log_bytes: u64,
    pub reads_served: u64,
    pub read_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = StoreMetrics::new();
        metrics.record_value_written(10);
        metrics.record_value_written(20);
        metrics.record_value_log_bytes(100);
        metrics.record_toc_log_bytes(50);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.values_written, 2);
        assert_eq!(snapshot.value_bytes, 30);
        assert_eq!(snapshot.value_log_bytes, 100);
        assert_eq!(snapshot.toc_log_bytes, 50);
    }

    #[test]
    fn clones_share_state() {
        let metrics = StoreMetrics::new();
        let clone = metrics.clone();
        clone.record_read();
        assert_eq!(metrics.snapshot().reads_served, 1);
    }
}
