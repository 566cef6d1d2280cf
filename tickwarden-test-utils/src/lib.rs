//! Tickwarden Test Utilities
//!
//! Shared test infrastructure for the tickwarden workspace:
//! - Proptest generators for tick ranges and batch descriptors
//! - A recording indexer and a fault-injecting coordination store
//! - Fixtures for publishing contiguous batch runs
//! - Assertions on `CoordResult` variants

pub use tickwarden_storage::{InMemoryBatchSource, InMemoryCoordinationStore};

pub use tickwarden_core::{
    format_batch_name, BatchDescriptor, ClaimCounts, ClaimOutcome, ClaimRecord, ClaimStatus,
    ConfigError, CoordError, CoordResult, CoordinatorConfig, EntityKind, GapRecord, GapSplit,
    GapStatus, ProcessingError, StorageError, Tick, TickRange, Timestamp,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tickwarden_indexer::indexer::{decode_json_lines, Indexer, TickRow};
use tickwarden_storage::{ClaimStore, CoordinationStore, GapStore};

// ============================================================================
// RECORDING INDEXER
// ============================================================================

/// Indexer that decodes JSON-lines batches and remembers every flush.
///
/// `process` can be slowed down with [`RecordingIndexer::with_delay`] to let
/// competing workers interleave, and made to fail with
/// [`RecordingIndexer::set_failing`].
#[derive(Debug)]
pub struct RecordingIndexer {
    consumer_class: String,
    delay: Duration,
    failing: AtomicBool,
    chunks: Mutex<Vec<usize>>,
    ticks: Mutex<Vec<Tick>>,
}

impl RecordingIndexer {
    pub fn new(consumer_class: impl Into<String>) -> Self {
        Self {
            consumer_class: consumer_class.into(),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            chunks: Mutex::new(Vec::new()),
            ticks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Sizes of the successful `process` calls, in order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Every tick handed to a successful `process` call, in order.
    pub fn ticks(&self) -> Vec<Tick> {
        self.ticks.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Indexer for RecordingIndexer {
    type Record = TickRow;

    fn consumer_class(&self) -> &str {
        &self.consumer_class
    }

    fn decode(
        &self,
        batch: &BatchDescriptor,
        contents: &[u8],
    ) -> Result<Vec<TickRow>, ProcessingError> {
        decode_json_lines(batch, contents)
    }

    async fn process(&self, records: &[TickRow]) -> Result<(), ProcessingError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProcessingError::Downstream {
                reason: "sink unavailable".to_string(),
            });
        }
        if let Ok(mut chunks) = self.chunks.lock() {
            chunks.push(records.len());
        }
        if let Ok(mut ticks) = self.ticks.lock() {
            ticks.extend(records.iter().map(|r| r.tick));
        }
        Ok(())
    }
}

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// In-memory store wrapper that fails on demand.
///
/// - `fail_next_claims(n)` makes the next `n` `try_claim` calls return a
///   retryable `QueryFailed`
/// - `fail_next_completions(n)` does the same for `mark_completed`
/// - `close()` makes every call return the fatal `PoolClosed`
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryCoordinationStore,
    claim_failures: AtomicUsize,
    completion_failures: AtomicUsize,
    closed: AtomicBool,
    releases: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryCoordinationStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryCoordinationStore {
        &self.inner
    }

    pub fn fail_next_claims(&self, n: usize) {
        self.claim_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_completions(&self, n: usize) {
        self.completion_failures.store(n, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// How many times idle connections were released.
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> CoordResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::PoolClosed.into());
        }
        Ok(())
    }

    /// Consume one injected failure from `counter`, if any are left.
    fn inject(counter: &AtomicUsize, operation: &str) -> CoordResult<()> {
        let injected = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::QueryFailed {
                operation: operation.to_string(),
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for FlakyStore {
    async fn try_claim(
        &self,
        consumer_class: &str,
        batch: &BatchDescriptor,
    ) -> CoordResult<ClaimOutcome> {
        self.check_open()?;
        Self::inject(&self.claim_failures, "try_claim")?;
        self.inner.try_claim(consumer_class, batch).await
    }

    async fn mark_completed(&self, consumer_class: &str, batch_id: &str) -> CoordResult<bool> {
        self.check_open()?;
        Self::inject(&self.completion_failures, "mark_completed")?;
        self.inner.mark_completed(consumer_class, batch_id).await
    }

    async fn mark_failed(
        &self,
        consumer_class: &str,
        batch_id: &str,
        reason: &str,
    ) -> CoordResult<bool> {
        self.check_open()?;
        self.inner.mark_failed(consumer_class, batch_id, reason).await
    }

    async fn max_completed_end(&self, consumer_class: &str) -> CoordResult<Option<Tick>> {
        self.check_open()?;
        self.inner.max_completed_end(consumer_class).await
    }

    async fn claims_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<ClaimRecord>> {
        self.check_open()?;
        self.inner.claims_in_range(consumer_class, range).await
    }

    async fn claim_get(
        &self,
        consumer_class: &str,
        batch_id: &str,
    ) -> CoordResult<Option<ClaimRecord>> {
        self.check_open()?;
        self.inner.claim_get(consumer_class, batch_id).await
    }

    async fn claim_counts(&self, consumer_class: &str) -> CoordResult<ClaimCounts> {
        self.check_open()?;
        self.inner.claim_counts(consumer_class).await
    }
}

#[async_trait]
impl GapStore for FlakyStore {
    async fn record_gap(
        &self,
        consumer_class: &str,
        range: TickRange,
        detected_at: Timestamp,
    ) -> CoordResult<bool> {
        self.check_open()?;
        self.inner.record_gap(consumer_class, range, detected_at).await
    }

    async fn record_uncovered(
        &self,
        consumer_class: &str,
        candidate: TickRange,
        covered: &[TickRange],
        detected_at: Timestamp,
    ) -> CoordResult<Vec<TickRange>> {
        self.check_open()?;
        self.inner
            .record_uncovered(consumer_class, candidate, covered, detected_at)
            .await
    }

    async fn oldest_pending_gap(&self, consumer_class: &str) -> CoordResult<Option<GapRecord>> {
        self.check_open()?;
        self.inner.oldest_pending_gap(consumer_class).await
    }

    async fn gaps_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<GapRecord>> {
        self.check_open()?;
        self.inner.gaps_in_range(consumer_class, range).await
    }

    async fn split_gap(
        &self,
        consumer_class: &str,
        original_gap_start: Tick,
        found: TickRange,
    ) -> CoordResult<Option<GapSplit>> {
        self.check_open()?;
        self.inner
            .split_gap(consumer_class, original_gap_start, found)
            .await
    }

    async fn mark_permanent(&self, consumer_class: &str, gap_start: Tick) -> CoordResult<bool> {
        self.check_open()?;
        self.inner.mark_permanent(consumer_class, gap_start).await
    }

    async fn list_gaps(&self, consumer_class: &str) -> CoordResult<Vec<GapRecord>> {
        self.check_open()?;
        self.inner.list_gaps(consumer_class).await
    }
}

#[async_trait]
impl CoordinationStore for FlakyStore {
    async fn release_idle_connections(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }

    async fn health_check(&self) -> CoordResult<bool> {
        Ok(!self.closed.load(Ordering::SeqCst))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tick arithmetic inputs.

    use super::*;
    use proptest::prelude::*;

    /// A non-empty half-open range within a modest tick window.
    pub fn arb_tick_range() -> impl Strategy<Value = TickRange> {
        (0i64..100_000, 1i64..10_000).prop_map(|(start, len)| TickRange::new(start, start + len))
    }

    /// A batch aligned to `sampling_interval` holding 1 to 200 ticks.
    pub fn arb_batch_descriptor(sampling_interval: i64) -> impl Strategy<Value = BatchDescriptor> {
        (0i64..10_000, 1i64..200).prop_map(move |(slot, ticks)| {
            let start = slot * sampling_interval;
            let end = start + (ticks - 1) * sampling_interval;
            BatchDescriptor::new(format_batch_name(start, end), start, end)
        })
    }

    pub fn arb_consumer_class() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built batch runs for scheduling scenarios.

    use super::*;

    /// `count` back-to-back batches of `ticks_per_batch` ticks starting at
    /// `first_tick`.
    pub fn contiguous_batches(
        first_tick: Tick,
        count: usize,
        ticks_per_batch: i64,
        sampling_interval: i64,
    ) -> Vec<BatchDescriptor> {
        let span = ticks_per_batch * sampling_interval;
        (0..count as i64)
            .map(|i| {
                let start = first_tick + i * span;
                let end = start + span - sampling_interval;
                BatchDescriptor::new(format_batch_name(start, end), start, end)
            })
            .collect()
    }

    /// One `{"tick": t, "value": n}` line per tick of the batch.
    pub fn jsonl_contents(batch: &BatchDescriptor, sampling_interval: i64) -> Vec<u8> {
        let mut out = String::new();
        let mut tick = batch.tick_start;
        let mut n = 0u64;
        while tick <= batch.tick_end {
            let line = serde_json::json!({ "tick": tick, "value": n });
            out.push_str(&line.to_string());
            out.push('\n');
            tick += sampling_interval;
            n += 1;
        }
        out.into_bytes()
    }

    pub async fn publish_batches(
        source: &InMemoryBatchSource,
        batches: &[BatchDescriptor],
        sampling_interval: i64,
    ) {
        for batch in batches {
            source
                .publish(batch.clone(), jsonl_contents(batch, sampling_interval))
                .await;
        }
    }

    /// Config with short timers, suited to paused-clock tests.
    pub fn fast_config(consumer_class: &str) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::new(consumer_class);
        config.poll_interval = Duration::from_millis(100);
        config.error_backoff = Duration::from_millis(50);
        config.buffer_idle_flush = Duration::from_millis(500);
        config
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on `CoordResult` variants.

    use super::*;

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CoordResult<T>) {
        match result {
            Err(CoordError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CoordResult<T>, entity: EntityKind) {
        match result {
            Err(CoordError::Storage(StorageError::NotFound { entity: e, .. })) => {
                assert_eq!(*e, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", entity, other),
        }
    }

    #[track_caller]
    pub fn assert_fatal<T: std::fmt::Debug>(result: &CoordResult<T>) {
        match result {
            Err(e) if e.is_fatal() => {}
            other => panic!("Expected fatal error, got: {:?}", other),
        }
    }

    /// Every claim of the class has the given status.
    pub async fn assert_all_claims<S: ClaimStore + ?Sized>(
        store: &S,
        consumer_class: &str,
        batches: &[BatchDescriptor],
        status: ClaimStatus,
    ) {
        for batch in batches {
            let claim = store
                .claim_get(consumer_class, &batch.id)
                .await
                .unwrap_or_else(|e| panic!("claim_get failed for {}: {}", batch.id, e));
            match claim {
                Some(claim) => assert_eq!(
                    claim.status, status,
                    "Wrong status for batch {}",
                    batch.id
                ),
                None => panic!("No claim row for batch {}", batch.id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_contiguous_batches_tile_the_axis() {
        let batches = contiguous_batches(0, 3, 100, 10);
        assert_eq!(batches[0].tick_start, 0);
        assert_eq!(batches[0].tick_end, 990);
        assert_eq!(batches[1].tick_start, 1000);
        assert_eq!(batches[2].end_exclusive(10), 3000);
    }

    #[test]
    fn test_jsonl_contents_one_line_per_tick() {
        let batch = BatchDescriptor::new("b", 0, 990);
        let rows = decode_json_lines(&batch, &jsonl_contents(&batch, 10)).unwrap();
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[99].tick, 990);
    }

    #[tokio::test]
    async fn test_flaky_store_injects_then_recovers() {
        let store = FlakyStore::new(InMemoryCoordinationStore::new());
        let batch = BatchDescriptor::new(format_batch_name(0, 90), 0, 90);

        store.fail_next_claims(1);
        let err = store.try_claim("c", &batch).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            store.try_claim("c", &batch).await.unwrap(),
            ClaimOutcome::Claimed
        );

        store.fail_next_completions(1);
        assert!(store.mark_completed("c", &batch.id).await.unwrap_err().is_retryable());
        assert!(store.mark_completed("c", &batch.id).await.unwrap());

        store.close();
        assertions::assert_fatal(&store.max_completed_end("c").await);
    }
}
