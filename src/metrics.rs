//! Metrics collection for uploads
//!
//! Thread-safe counters using atomic operations. They track chunk attempts,
//! retries, session renewals and acknowledged bytes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for uploads
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct UploadMetrics {
    // Chunk statistics
    chunk_attempts: AtomicU64,
    chunks_uploaded: AtomicU64,
    chunks_failed: AtomicU64,
    retries: AtomicU64,

    // Session statistics
    sessions_opened: AtomicU64,
    session_renewals: AtomicU64,

    // Byte statistics
    bytes_uploaded: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_chunk_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chunk_attempts: u64,
    pub chunks_uploaded: u64,
    pub chunks_failed: u64,
    pub retries: u64,
    pub sessions_opened: u64,
    pub session_renewals: u64,
    pub bytes_uploaded: u64,
    pub total_chunk_duration_us: u64,
}

impl UploadMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one PUT attempt and how long it took
    pub fn record_chunk_attempt(&self, duration: Duration) {
        self.chunk_attempts.fetch_add(1, Ordering::Relaxed);
        self.total_chunk_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record an acknowledged chunk of `bytes` bytes
    pub fn record_chunk_uploaded(&self, bytes: u64) {
        self.chunks_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a chunk that exhausted its attempts
    pub fn record_chunk_failed(&self) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_renewal(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        self.session_renewals.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded one by one, so a snapshot taken during an upload
    /// may not be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunk_attempts: self.chunk_attempts.load(Ordering::Relaxed),
            chunks_uploaded: self.chunks_uploaded.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            session_renewals: self.session_renewals.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            total_chunk_duration_us: self.total_chunk_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        self.chunk_attempts.store(0, Ordering::Relaxed);
        self.chunks_uploaded.store(0, Ordering::Relaxed);
        self.chunks_failed.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.sessions_opened.store(0, Ordering::Relaxed);
        self.session_renewals.store(0, Ordering::Relaxed);
        self.bytes_uploaded.store(0, Ordering::Relaxed);
        self.total_chunk_duration_us.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Average PUT duration in milliseconds
    pub fn avg_chunk_duration_ms(&self) -> f64 {
        if self.chunk_attempts == 0 {
            0.0
        } else {
            (self.total_chunk_duration_us as f64 / self.chunk_attempts as f64) / 1000.0
        }
    }

    /// Share of attempts that were retries, as a percentage (0.0 to 100.0)
    pub fn retry_rate(&self) -> f64 {
        if self.chunk_attempts == 0 {
            0.0
        } else {
            (self.retries as f64 / self.chunk_attempts as f64) * 100.0
        }
    }
}
