//! Scheduling Loop
//!
//! One loop per worker instance. Each iteration:
//!
//! 1. **Gap fill**: take the oldest pending gap. Once it is older than
//!    `gap_timeout`, split out any claimed batch it still contains or else
//!    promote it to permanent; otherwise look for a batch intersecting it,
//!    claim it, buffer its records and split the gap around it.
//! 2. **Discovery** (only when gap fill made no progress): take the next
//!    batch from the resumable listing, record any gap in front of it, claim
//!    it, buffer its records and split any pending gap it lands in. An empty
//!    page releases idle connections, sleeps for `poll_interval` and restarts
//!    the listing from the beginning so that late arrivals behind the cursor
//!    are found.
//!
//! The idle flush check runs after every iteration. The loop stops when the
//! shutdown channel flips to `true` (or its sender is dropped) and drains the
//! buffer before returning.

use crate::buffer::TickBuffer;
use crate::constants::FETCH_ATTEMPTS;
use crate::gap_tracker::GapTracker;
use crate::indexer::Indexer;
use crate::stats::{WorkerStats, WorkerStatsSnapshot};
use crate::telemetry::metrics;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tickwarden_core::{
    BatchDescriptor, ClaimOutcome, ConfigError, CoordError, CoordResult, CoordinatorConfig,
};
use tickwarden_storage::{BatchSource, CoordinationStore, ListBatchesRequest};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// What one iteration accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// A batch was claimed and buffered.
    Progress,
    /// The discovered batch was already claimed; move on without sleeping.
    Contended,
    /// The listing is exhausted; sleep before rescanning.
    Idle,
}

pub struct SchedulingLoop<I: Indexer> {
    worker_id: String,
    config: CoordinatorConfig,
    sampling_interval: i64,
    store: Arc<dyn CoordinationStore>,
    source: Arc<dyn BatchSource>,
    indexer: Arc<I>,
    gaps: GapTracker,
    buffer: TickBuffer<I>,
    /// Continuation token of the discovery listing.
    cursor: Option<String>,
    /// Discovered batches not yet attempted.
    queue: VecDeque<BatchDescriptor>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<WorkerStats>,
}

impl<I: Indexer> SchedulingLoop<I> {
    pub fn new(
        config: CoordinatorConfig,
        sampling_interval: i64,
        store: Arc<dyn CoordinationStore>,
        source: Arc<dyn BatchSource>,
        indexer: Arc<I>,
        shutdown: watch::Receiver<bool>,
    ) -> CoordResult<Self> {
        config.validate()?;

        if sampling_interval <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "sampling_interval".to_string(),
                value: sampling_interval.to_string(),
                reason: "sampling_interval must be greater than 0".to_string(),
            }
            .into());
        }

        if indexer.consumer_class() != config.consumer_class {
            return Err(ConfigError::InvalidValue {
                field: "consumer_class".to_string(),
                value: indexer.consumer_class().to_string(),
                reason: format!(
                    "indexer consumer class does not match configured '{}'",
                    config.consumer_class
                ),
            }
            .into());
        }

        let stats = Arc::new(WorkerStats::new());
        let gaps = GapTracker::new(
            store.clone(),
            config.consumer_class.clone(),
            sampling_interval,
            stats.clone(),
        );
        let buffer = TickBuffer::new(
            indexer.clone(),
            store.clone(),
            config.insert_batch_size,
            config.buffer_idle_flush,
            stats.clone(),
        );

        Ok(Self {
            worker_id: format!("{}-{}", config.consumer_class, Uuid::now_v7()),
            config,
            sampling_interval,
            store,
            source,
            indexer,
            gaps,
            buffer,
            cursor: None,
            queue: VecDeque::new(),
            shutdown,
            stats,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Live counters for this worker.
    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration` unless a stop is requested first. Returns `true`
    /// when the loop should stop.
    async fn sleep_or_stop(&mut self, duration: Duration) -> bool {
        if self.stop_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }

    /// Run until stopped. Returns the final counters, or the error that
    /// stopped the loop.
    pub async fn run(mut self) -> CoordResult<WorkerStatsSnapshot> {
        info!(
            worker_id = %self.worker_id,
            consumer_class = %self.config.consumer_class,
            sampling_interval = self.sampling_interval,
            insert_batch_size = self.config.insert_batch_size,
            gap_timeout_secs = self.config.gap_timeout.as_secs(),
            "Scheduling loop started"
        );

        let mut fatal: Option<CoordError> = None;

        while !self.stop_requested() {
            WorkerStats::incr(&self.stats.iterations);

            let outcome = self.run_iteration().await;
            let idle_flush = self.buffer.check_idle_timeout().await;

            let mut pause: Option<Duration> = None;
            match outcome {
                Ok(Iteration::Progress) | Ok(Iteration::Contended) => {}
                Ok(Iteration::Idle) => {
                    WorkerStats::incr(&self.stats.idle_polls);
                    self.store.release_idle_connections().await;
                    self.cursor = None;
                    pause = Some(self.config.poll_interval);
                }
                Err(e) => match self.handle_error(e) {
                    Ok(()) => pause = Some(self.config.error_backoff),
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                },
            }

            if let Err(e) = idle_flush {
                match self.handle_error(e) {
                    Ok(()) => {
                        pause = Some(pause.map_or(self.config.error_backoff, |p| {
                            p.max(self.config.error_backoff)
                        }))
                    }
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }
            }

            if let Some(duration) = pause {
                if self.sleep_or_stop(duration).await {
                    break;
                }
            }
        }

        let flushed = self.buffer.flush().await;
        let snapshot = self.stats.snapshot();
        info!(
            worker_id = %self.worker_id,
            consumer_class = %self.config.consumer_class,
            batches_claimed = snapshot.batches_claimed,
            batches_completed = snapshot.batches_completed,
            batches_failed = snapshot.batches_failed,
            gaps_recorded = snapshot.gaps_recorded,
            errors = snapshot.errors,
            "Scheduling loop stopped"
        );

        if let Some(e) = fatal {
            error!(worker_id = %self.worker_id, error = %e, "Scheduling loop ended by fatal error");
            return Err(e);
        }
        if let Err(e) = flushed {
            error!(worker_id = %self.worker_id, error = %e, "Final flush failed");
            return Err(e);
        }
        Ok(snapshot)
    }

    /// Log and count a non-fatal error; hand fatal ones back.
    fn handle_error(&self, err: CoordError) -> CoordResult<()> {
        WorkerStats::incr(&self.stats.errors);
        if err.is_fatal() {
            return Err(err);
        }
        if err.is_retryable() {
            if let Some(m) = metrics() {
                m.record_store_error(&self.config.consumer_class, err.category());
            }
            warn!(
                worker_id = %self.worker_id,
                category = err.category(),
                error = %err,
                "Transient coordination failure; backing off"
            );
        } else {
            error!(
                worker_id = %self.worker_id,
                category = err.category(),
                error = %err,
                "Iteration failed"
            );
        }
        Ok(())
    }

    /// One gap-fill attempt followed, if it made no progress, by one
    /// discovery attempt.
    pub async fn run_iteration(&mut self) -> CoordResult<Iteration> {
        if self.fill_oldest_gap().await? {
            return Ok(Iteration::Progress);
        }
        self.discover_next().await
    }

    // ========================================================================
    // PHASE 1: GAP FILL
    // ========================================================================

    async fn fill_oldest_gap(&mut self) -> CoordResult<bool> {
        let Some(gap) = self.gaps.oldest_pending_gap().await? else {
            return Ok(false);
        };

        if gap.is_timed_out(Utc::now(), self.config.gap_timeout) {
            // Ticks owned by a claim are not missing; only the rest is promoted.
            if !self.gaps.carve_claimed(&gap).await? {
                self.gaps.mark_permanent(&gap).await?;
            }
            return Ok(false);
        }

        let request = ListBatchesRequest::new(
            self.config.path_prefix.clone(),
            1,
            self.sampling_interval,
        )
        .with_tick_filter(gap.range());
        let page = self.source.list_batches(&request).await?;
        let Some(batch) = page.batches.into_iter().next() else {
            trace!(
                worker_id = %self.worker_id,
                gap_start = gap.gap_start,
                gap_end = gap.gap_end,
                "No batch available for gap yet"
            );
            return Ok(false);
        };

        let outcome = self.claim(&batch).await?;
        match outcome {
            ClaimOutcome::Claimed => {
                debug!(
                    worker_id = %self.worker_id,
                    batch_id = %batch.id,
                    gap_start = gap.gap_start,
                    gap_end = gap.gap_end,
                    "Filling gap"
                );
                self.ingest(&batch).await?;
                self.gaps.split(&gap, &batch).await?;
                Ok(true)
            }
            ClaimOutcome::AlreadyClaimed => {
                // The claim row owns that range even if it was never split out.
                self.gaps.split(&gap, &batch).await?;
                Ok(false)
            }
        }
    }

    // ========================================================================
    // PHASE 2: DISCOVERY
    // ========================================================================

    async fn discover_next(&mut self) -> CoordResult<Iteration> {
        if self.queue.is_empty() {
            let request = ListBatchesRequest::new(
                self.config.path_prefix.clone(),
                self.config.page_size,
                self.sampling_interval,
            )
            .with_continuation(self.cursor.clone());
            let page = self.source.list_batches(&request).await?;
            if page.is_empty() {
                return Ok(Iteration::Idle);
            }
            self.cursor = page
                .next_continuation
                .clone()
                .or_else(|| page.batches.last().map(|b| b.id.clone()));
            self.queue.extend(page.batches);
        }

        let Some(batch) = self.queue.pop_front() else {
            return Ok(Iteration::Idle);
        };

        let checked = self
            .gaps
            .check_and_record_gap_before(batch.tick_start, batch.tick_end)
            .await;
        if let Err(e) = checked {
            self.queue.push_front(batch);
            return Err(e);
        }

        let claimed = self.claim(&batch).await;
        let outcome = match claimed {
            Ok(outcome) => outcome,
            Err(e) => {
                self.queue.push_front(batch);
                return Err(e);
            }
        };

        match outcome {
            ClaimOutcome::Claimed => {
                self.ingest(&batch).await?;
                self.gaps.close_covered(&batch).await?;
                Ok(Iteration::Progress)
            }
            ClaimOutcome::AlreadyClaimed => Ok(Iteration::Contended),
        }
    }

    // ========================================================================
    // CLAIM AND INGEST
    // ========================================================================

    async fn claim(&self, batch: &BatchDescriptor) -> CoordResult<ClaimOutcome> {
        let class = self.config.consumer_class.as_str();
        let outcome = self.store.try_claim(class, batch).await?;

        if let Some(m) = metrics() {
            m.record_claim(class, outcome);
        }

        match outcome {
            ClaimOutcome::Claimed => {
                WorkerStats::incr(&self.stats.batches_claimed);
                debug!(
                    worker_id = %self.worker_id,
                    batch_id = %batch.id,
                    tick_start = batch.tick_start,
                    tick_end = batch.tick_end,
                    "Claimed batch"
                );
            }
            ClaimOutcome::AlreadyClaimed => {
                WorkerStats::incr(&self.stats.already_claimed);
                trace!(worker_id = %self.worker_id, batch_id = %batch.id, "Batch already claimed");
            }
        }

        Ok(outcome)
    }

    /// Read, decode and buffer a batch this worker has just claimed.
    ///
    /// Transient read failures are retried up to `FETCH_ATTEMPTS` times. A
    /// batch that still cannot be read, or cannot be decoded, is marked
    /// failed so that it stays visible without blocking the loop.
    async fn ingest(&mut self, batch: &BatchDescriptor) -> CoordResult<()> {
        let contents = match self.fetch_with_retry(batch).await {
            Ok(contents) => contents,
            Err(e) => {
                self.abandon_claim(batch, &e).await;
                return Err(e);
            }
        };

        let records = match self.indexer.decode(batch, &contents) {
            Ok(records) => records,
            Err(e) => {
                let e = CoordError::from(e);
                self.abandon_claim(batch, &e).await;
                return Err(e);
            }
        };

        trace!(
            worker_id = %self.worker_id,
            batch_id = %batch.id,
            records = records.len(),
            "Buffering batch"
        );
        self.buffer.add_records(&batch.id, records).await?;
        Ok(())
    }

    async fn fetch_with_retry(&self, batch: &BatchDescriptor) -> CoordResult<Vec<u8>> {
        let mut attempt = 1;
        loop {
            match self.source.fetch(batch).await {
                Ok(contents) => return Ok(contents),
                Err(e) if e.is_retryable() && attempt < FETCH_ATTEMPTS => {
                    warn!(
                        worker_id = %self.worker_id,
                        batch_id = %batch.id,
                        attempt,
                        error = %e,
                        "Batch read failed; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.error_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn abandon_claim(&self, batch: &BatchDescriptor, cause: &CoordError) {
        let class = self.config.consumer_class.as_str();
        match self
            .store
            .mark_failed(class, &batch.id, &cause.to_string())
            .await
        {
            Ok(true) => WorkerStats::incr(&self.stats.batches_failed),
            Ok(false) => {}
            Err(e) => warn!(
                worker_id = %self.worker_id,
                batch_id = %batch.id,
                error = %e,
                "Failed to mark unreadable batch failed"
            ),
        }
    }
}
