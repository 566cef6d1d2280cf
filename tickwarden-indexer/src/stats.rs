//! Per-worker counters.
//!
//! Unlike the Prometheus metrics, which aggregate per process and consumer
//! class, these belong to one scheduling loop and are returned when it exits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one scheduling loop.
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Loop iterations started
    pub iterations: AtomicU64,

    /// Batches this worker claimed
    pub batches_claimed: AtomicU64,

    /// Claim attempts that lost to another worker
    pub already_claimed: AtomicU64,

    /// Records added to the buffer
    pub records_buffered: AtomicU64,

    /// Successful flushes
    pub flushes: AtomicU64,

    /// Batches marked completed
    pub batches_completed: AtomicU64,

    /// Batches marked failed
    pub batches_failed: AtomicU64,

    /// Gap rows recorded
    pub gaps_recorded: AtomicU64,

    /// Gap splits performed
    pub gaps_split: AtomicU64,

    /// Gaps this worker promoted to permanent
    pub gaps_permanent: AtomicU64,

    /// Empty discovery pages followed by an idle sleep
    pub idle_polls: AtomicU64,

    /// Errors handled by the loop
    pub errors: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            batches_claimed: self.batches_claimed.load(Ordering::Relaxed),
            already_claimed: self.already_claimed.load(Ordering::Relaxed),
            records_buffered: self.records_buffered.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            gaps_recorded: self.gaps_recorded.load(Ordering::Relaxed),
            gaps_split: self.gaps_split.load(Ordering::Relaxed),
            gaps_permanent: self.gaps_permanent.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of worker counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub iterations: u64,
    pub batches_claimed: u64,
    pub already_claimed: u64,
    pub records_buffered: u64,
    pub flushes: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub gaps_recorded: u64,
    pub gaps_split: u64,
    pub gaps_permanent: u64,
    pub idle_polls: u64,
    pub errors: u64,
}
