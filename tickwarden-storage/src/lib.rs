//! Tickwarden Storage - Coordination Store Traits and In-Memory Implementation
//!
//! Defines the persistence ports the scheduling loop talks to:
//!
//! - [`ClaimStore`]: atomic claim / complete / fail bookkeeping per
//!   `(consumer_class, batch_id)`
//! - [`GapStore`]: the persistent interval set of missing tick ranges
//! - [`BatchSource`]: paging through available batch files
//! - [`SamplingIntervalProvider`]: the run's tick spacing
//!
//! The PostgreSQL implementation of the stores lives in `tickwarden-indexer`.

pub mod discovery;
pub mod local_dir;
pub mod memory;
pub mod sampling;

pub use discovery::{BatchPage, BatchSource, InMemoryBatchSource, ListBatchesRequest};
pub use local_dir::LocalDirBatchSource;
pub use memory::InMemoryCoordinationStore;
pub use sampling::{FixedSamplingInterval, SamplingIntervalProvider};

use async_trait::async_trait;
use tickwarden_core::{
    BatchDescriptor, ClaimCounts, ClaimOutcome, ClaimRecord, CoordResult, GapRecord, GapSplit,
    Tick, TickRange, Timestamp,
};

// ============================================================================
// CLAIM STORE
// ============================================================================

/// Persistent claim bookkeeping.
///
/// Inserting a claim row is the mutual-exclusion primitive: among any number
/// of concurrent `try_claim` calls for the same `(consumer_class, batch_id)`
/// exactly one observes [`ClaimOutcome::Claimed`]. Different consumer classes
/// never interfere.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomically insert a `Claimed` row for the batch.
    ///
    /// A uniqueness conflict is reported as `AlreadyClaimed`; any other
    /// failure is an error and is safe to retry on the same batch.
    async fn try_claim(
        &self,
        consumer_class: &str,
        batch: &BatchDescriptor,
    ) -> CoordResult<ClaimOutcome>;

    /// Transition `Claimed -> Completed`.
    ///
    /// Returns `false` when the row was already terminal (idempotent no-op).
    /// A missing row is `StorageError::NotFound`.
    async fn mark_completed(&self, consumer_class: &str, batch_id: &str) -> CoordResult<bool>;

    /// Transition `Claimed -> Failed`, recording `reason`.
    ///
    /// Same return contract as [`ClaimStore::mark_completed`].
    async fn mark_failed(
        &self,
        consumer_class: &str,
        batch_id: &str,
        reason: &str,
    ) -> CoordResult<bool>;

    /// Largest inclusive `tick_end` among `Completed` rows, if any.
    async fn max_completed_end(&self, consumer_class: &str) -> CoordResult<Option<Tick>>;

    /// Claims (any status) whose inclusive `[tick_start, tick_end]` intersects
    /// the half-open `range`.
    async fn claims_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<ClaimRecord>>;

    /// Get a claim row.
    async fn claim_get(
        &self,
        consumer_class: &str,
        batch_id: &str,
    ) -> CoordResult<Option<ClaimRecord>>;

    /// Row counts per status.
    async fn claim_counts(&self, consumer_class: &str) -> CoordResult<ClaimCounts>;
}

// ============================================================================
// GAP STORE
// ============================================================================

/// Persistent set of missing tick ranges per consumer class.
///
/// Rows are keyed by `(consumer_class, gap_start)` and describe disjoint
/// half-open intervals.
#[async_trait]
pub trait GapStore: Send + Sync {
    /// Insert a `Pending` gap. Returns `false` if a row with the same start
    /// already exists (insert-on-conflict-do-nothing).
    async fn record_gap(
        &self,
        consumer_class: &str,
        range: TickRange,
        detected_at: Timestamp,
    ) -> CoordResult<bool>;

    /// Insert `Pending` rows for the parts of `candidate` covered neither by
    /// `covered` nor by any existing gap row of the class.
    ///
    /// Reading the existing gaps and inserting the remainder is atomic with
    /// respect to other `record_uncovered` callers, so concurrent detections
    /// of the same discontinuity never produce overlapping rows. Returns the
    /// inserted ranges.
    async fn record_uncovered(
        &self,
        consumer_class: &str,
        candidate: TickRange,
        covered: &[TickRange],
        detected_at: Timestamp,
    ) -> CoordResult<Vec<TickRange>>;

    /// The `Pending` gap with the smallest `gap_start`.
    async fn oldest_pending_gap(&self, consumer_class: &str) -> CoordResult<Option<GapRecord>>;

    /// Gaps of any status intersecting `range`.
    async fn gaps_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<GapRecord>>;

    /// Atomically replace the gap starting at `original_gap_start` with the
    /// parts not covered by `found`.
    ///
    /// Returns `None` when the row no longer exists (closed concurrently);
    /// that is a silent no-op, not an error. Successors inherit the original
    /// `first_detected` and status.
    async fn split_gap(
        &self,
        consumer_class: &str,
        original_gap_start: Tick,
        found: TickRange,
    ) -> CoordResult<Option<GapSplit>>;

    /// Transition `Pending -> Permanent`. Returns `true` only for the caller
    /// that performed the transition.
    async fn mark_permanent(&self, consumer_class: &str, gap_start: Tick) -> CoordResult<bool>;

    /// All gaps for a consumer class ordered by `gap_start`.
    async fn list_gaps(&self, consumer_class: &str) -> CoordResult<Vec<GapRecord>>;
}

// ============================================================================
// COMBINED STORE
// ============================================================================

/// Everything the scheduling loop needs from the shared persistent store.
#[async_trait]
pub trait CoordinationStore: ClaimStore + GapStore {
    /// Give pooled connections back before an idle sleep.
    async fn release_idle_connections(&self) {}

    /// Check if the storage backend is reachable.
    async fn health_check(&self) -> CoordResult<bool>;
}
