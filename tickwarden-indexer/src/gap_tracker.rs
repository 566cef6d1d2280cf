//! Gap detection, splitting and timeout promotion for one consumer class.
//!
//! Gaps are half-open `[gap_start, gap_end)` ranges. Batches carry inclusive
//! ends, converted with [`BatchDescriptor::range`] before any arithmetic.

use crate::stats::WorkerStats;
use crate::telemetry::metrics;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tickwarden_core::{
    expected_next_tick, BatchDescriptor, CoordResult, GapRecord, GapSplit, GapStatus, Tick,
    TickRange,
};
use tickwarden_storage::CoordinationStore;
use tracing::{debug, info, warn};

pub struct GapTracker {
    store: Arc<dyn CoordinationStore>,
    consumer_class: String,
    sampling_interval: i64,
    stats: Arc<WorkerStats>,
    /// Gap starts this process has already reported as permanent.
    reported_permanent: HashSet<Tick>,
}

impl GapTracker {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        consumer_class: impl Into<String>,
        sampling_interval: i64,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            store,
            consumer_class: consumer_class.into(),
            sampling_interval,
            stats,
            reported_permanent: HashSet::new(),
        }
    }

    pub fn sampling_interval(&self) -> i64 {
        self.sampling_interval
    }

    /// First tick expected after the completed high-water mark.
    pub async fn expected_next(&self) -> CoordResult<Tick> {
        let max_end = self.store.max_completed_end(&self.consumer_class).await?;
        Ok(expected_next_tick(max_end, self.sampling_interval))
    }

    /// Record the missing range between the completed high-water mark and a
    /// newly discovered batch.
    ///
    /// Parts of `[expected_next, candidate_start)` already covered by a gap
    /// row or a claim row (any status) are left out, so live gaps stay
    /// disjoint while claimed batches are still being buffered. The store
    /// subtracts existing gaps and inserts atomically. Returns `true` if at
    /// least one gap row was inserted.
    pub async fn check_and_record_gap_before(
        &self,
        candidate_start: Tick,
        candidate_end: Tick,
    ) -> CoordResult<bool> {
        let expected = self.expected_next().await?;
        if candidate_start <= expected {
            return Ok(false);
        }

        let candidate = TickRange::new(expected, candidate_start);
        let class = self.consumer_class.as_str();

        let claimed: Vec<TickRange> = self
            .store
            .claims_in_range(class, candidate)
            .await?
            .iter()
            .map(|claim| claim.range(self.sampling_interval))
            .collect();

        let inserted = self
            .store
            .record_uncovered(class, candidate, &claimed, Utc::now())
            .await?;

        for missing in &inserted {
            WorkerStats::incr(&self.stats.gaps_recorded);
            if let Some(m) = metrics() {
                m.gap_detected(class);
            }
            info!(
                consumer_class = class,
                gap_start = missing.start,
                gap_end = missing.end,
                candidate_start,
                candidate_end,
                "Recorded gap"
            );
        }

        Ok(!inserted.is_empty())
    }

    /// Oldest pending gap, the next one to fill.
    pub async fn oldest_pending_gap(&self) -> CoordResult<Option<GapRecord>> {
        self.store.oldest_pending_gap(&self.consumer_class).await
    }

    /// Carve a found batch out of `gap`.
    ///
    /// `None` means another worker already replaced or closed the gap.
    pub async fn split(
        &self,
        gap: &GapRecord,
        found: &BatchDescriptor,
    ) -> CoordResult<Option<GapSplit>> {
        self.split_range(gap, found.range(self.sampling_interval), &found.id)
            .await
    }

    /// Split every pending gap intersecting a claimed batch around it.
    /// Returns the number of gaps split.
    pub async fn close_covered(&self, claimed: &BatchDescriptor) -> CoordResult<usize> {
        let range = claimed.range(self.sampling_interval);
        let overlapping = self
            .store
            .gaps_in_range(&self.consumer_class, range)
            .await?;

        let mut split = 0;
        for gap in overlapping.iter().filter(|g| g.status == GapStatus::Pending) {
            if self.split_range(gap, range, &claimed.id).await?.is_some() {
                split += 1;
            }
        }
        Ok(split)
    }

    /// Split the first claimed batch (any status) out of `gap`.
    ///
    /// Returns `true` if the gap was split, in which case it must not be
    /// promoted: the remaining pieces are re-examined on their own.
    pub async fn carve_claimed(&self, gap: &GapRecord) -> CoordResult<bool> {
        let claims = self
            .store
            .claims_in_range(&self.consumer_class, gap.range())
            .await?;
        let Some(claim) = claims.first() else {
            return Ok(false);
        };
        let split = self
            .split_range(gap, claim.range(self.sampling_interval), &claim.batch_id)
            .await?;
        Ok(split.is_some())
    }

    async fn split_range(
        &self,
        gap: &GapRecord,
        found: TickRange,
        batch_id: &str,
    ) -> CoordResult<Option<GapSplit>> {
        let class = self.consumer_class.as_str();
        let split = self.store.split_gap(class, gap.gap_start, found).await?;

        match &split {
            Some(result) => {
                WorkerStats::incr(&self.stats.gaps_split);
                let successors = result.successors().count();
                if let Some(m) = metrics() {
                    m.gap_split(class, successors);
                }
                if result.is_closed() {
                    info!(
                        consumer_class = class,
                        gap_start = gap.gap_start,
                        gap_end = gap.gap_end,
                        batch_id,
                        "Gap closed"
                    );
                } else {
                    debug!(
                        consumer_class = class,
                        gap_start = gap.gap_start,
                        gap_end = gap.gap_end,
                        batch_id,
                        before = ?result.before,
                        after = ?result.after,
                        "Gap split"
                    );
                }
            }
            None => {
                debug!(
                    consumer_class = class,
                    gap_start = gap.gap_start,
                    "Gap already resolved by another worker"
                );
            }
        }

        Ok(split)
    }

    /// Promote a timed-out gap to permanent.
    ///
    /// The warning is emitted only by the caller whose update performed the
    /// transition, and at most once per gap in this process.
    pub async fn mark_permanent(&mut self, gap: &GapRecord) -> CoordResult<bool> {
        let class = self.consumer_class.as_str();
        let transitioned = self.store.mark_permanent(class, gap.gap_start).await?;

        if transitioned && self.reported_permanent.insert(gap.gap_start) {
            WorkerStats::incr(&self.stats.gaps_permanent);
            if let Some(m) = metrics() {
                m.gap_permanent(class);
            }
            warn!(
                consumer_class = class,
                gap_start = gap.gap_start,
                gap_end = gap.gap_end,
                first_detected = %gap.first_detected,
                missing_ticks = gap.range().len(),
                "Gap timed out; marking permanent"
            );
        }

        Ok(transitioned)
    }
}
