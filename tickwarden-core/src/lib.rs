//! Tickwarden Core - Coordination Types
//!
//! Pure data structures and interval arithmetic shared by every other crate.
//! Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod batch_name;
pub mod config;
pub mod enums;
pub mod error;
pub mod interval;

pub use batch_name::{format_batch_name, parse_batch_name, BATCH_FILE_EXTENSION, BATCH_FILE_PREFIX};
pub use config::{
    CoordinatorConfig, DEFAULT_BUFFER_IDLE_FLUSH_MS, DEFAULT_ERROR_BACKOFF_MS,
    DEFAULT_GAP_TIMEOUT_SECS, DEFAULT_INSERT_BATCH_SIZE, DEFAULT_PAGE_SIZE,
    DEFAULT_POLL_INTERVAL_MS,
};
pub use enums::{ClaimOutcome, ClaimStatus, GapStatus, StatusParseError};
pub use error::{
    ConfigError, CoordError, CoordResult, DiscoveryError, EntityKind, ProcessingError,
    StorageError,
};
pub use interval::{expected_next_tick, split_gap, subtract_covered, GapSplit, TickRange};

// ============================================================================
// PRIMITIVES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// A position in the upstream tick sequence.
pub type Tick = i64;

/// Tick at which a run is expected to start when nothing has completed yet.
pub const EXPECTED_ORIGIN: Tick = 0;

// ============================================================================
// BATCH DESCRIPTOR
// ============================================================================

/// A batch file as reported by the discovery port.
///
/// `tick_start` and `tick_end` are both inclusive: `tick_end` is the last tick
/// written into the file. Use [`BatchDescriptor::range`] to obtain the
/// half-open interval the gap tracker works with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchDescriptor {
    /// Stable identifier (file name, optionally with a path prefix).
    pub id: String,
    pub tick_start: Tick,
    pub tick_end: Tick,
}

impl BatchDescriptor {
    pub fn new(id: impl Into<String>, tick_start: Tick, tick_end: Tick) -> Self {
        Self {
            id: id.into(),
            tick_start,
            tick_end,
        }
    }

    /// First tick after this batch, given the run's sampling interval.
    pub fn end_exclusive(&self, sampling_interval: i64) -> Tick {
        self.tick_end + sampling_interval
    }

    /// Half-open tick range covered by this batch.
    pub fn range(&self, sampling_interval: i64) -> TickRange {
        TickRange::new(self.tick_start, self.end_exclusive(sampling_interval))
    }

    /// Whether any tick of this batch falls inside `range`.
    pub fn intersects(&self, range: &TickRange, sampling_interval: i64) -> bool {
        self.range(sampling_interval).intersects(range)
    }
}

// ============================================================================
// CLAIM RECORD
// ============================================================================

/// One claim row, keyed by `(consumer_class, batch_id)`.
///
/// Rows are never deleted; the table doubles as an audit log of every batch a
/// consumer class has touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub consumer_class: String,
    pub batch_id: String,
    /// First tick in the batch (inclusive).
    pub tick_start: Tick,
    /// Last tick in the batch (inclusive).
    pub tick_end: Tick,
    pub status: ClaimStatus,
    pub failure_reason: Option<String>,
    pub claimed_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl ClaimRecord {
    /// Build a fresh `Claimed` row for a batch.
    pub fn claimed(consumer_class: &str, batch: &BatchDescriptor, now: Timestamp) -> Self {
        Self {
            consumer_class: consumer_class.to_string(),
            batch_id: batch.id.clone(),
            tick_start: batch.tick_start,
            tick_end: batch.tick_end,
            status: ClaimStatus::Claimed,
            failure_reason: None,
            claimed_at: now,
            completed_at: None,
        }
    }

    /// Half-open tick range owned by this claim.
    pub fn range(&self, sampling_interval: i64) -> TickRange {
        TickRange::new(self.tick_start, self.tick_end + sampling_interval)
    }
}

/// Number of claim rows per status for one consumer class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCounts {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl ClaimCounts {
    pub fn total(&self) -> u64 {
        self.claimed + self.completed + self.failed
    }
}

// ============================================================================
// GAP RECORD
// ============================================================================

/// A missing half-open tick range `[gap_start, gap_end)` for one consumer class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRecord {
    pub consumer_class: String,
    pub gap_start: Tick,
    pub gap_end: Tick,
    pub first_detected: Timestamp,
    pub status: GapStatus,
}

impl GapRecord {
    pub fn pending(consumer_class: &str, range: TickRange, first_detected: Timestamp) -> Self {
        Self {
            consumer_class: consumer_class.to_string(),
            gap_start: range.start,
            gap_end: range.end,
            first_detected,
            status: GapStatus::Pending,
        }
    }

    pub fn range(&self) -> TickRange {
        TickRange::new(self.gap_start, self.gap_end)
    }

    /// Time elapsed since the gap was first detected (zero if the clock went backwards).
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.first_detected).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the gap has been open for longer than `timeout`.
    pub fn is_timed_out(&self, now: Timestamp, timeout: Duration) -> bool {
        self.age(now) > timeout
    }
}

// =============================================================================
// TESTS
// =============================================================================
