//! In-memory coordination store.
//!
//! Used by tests and single-process deployments. Every operation takes the
//! relevant lock for its whole duration, which gives the same atomicity the
//! PostgreSQL store gets from insert-on-conflict and row locks.

use crate::{ClaimStore, CoordinationStore, GapStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tickwarden_core::{
    split_gap, subtract_covered, BatchDescriptor, ClaimCounts, ClaimOutcome, ClaimRecord,
    ClaimStatus, CoordResult, EntityKind, GapRecord, GapSplit, GapStatus, StorageError, Tick,
    TickRange, Timestamp,
};

type ClaimKey = (String, String);
type GapKey = (String, Tick);

/// In-memory store for claims and gaps. Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCoordinationStore {
    claims: Arc<RwLock<HashMap<ClaimKey, ClaimRecord>>>,
    gaps: Arc<RwLock<BTreeMap<GapKey, GapRecord>>>,
}

impl InMemoryCoordinationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) -> CoordResult<()> {
        self.write_claims()?.clear();
        self.write_gaps()?.clear();
        Ok(())
    }

    /// Snapshot of every claim row for a consumer class.
    pub fn claims_for(&self, consumer_class: &str) -> CoordResult<Vec<ClaimRecord>> {
        let claims = self.read_claims()?;
        let mut rows: Vec<ClaimRecord> = claims
            .values()
            .filter(|c| c.consumer_class == consumer_class)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.tick_start);
        Ok(rows)
    }

    fn read_claims(&self) -> CoordResult<RwLockReadGuard<'_, HashMap<ClaimKey, ClaimRecord>>> {
        self.claims
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write_claims(&self) -> CoordResult<RwLockWriteGuard<'_, HashMap<ClaimKey, ClaimRecord>>> {
        self.claims
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn read_gaps(&self) -> CoordResult<RwLockReadGuard<'_, BTreeMap<GapKey, GapRecord>>> {
        self.gaps.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write_gaps(&self) -> CoordResult<RwLockWriteGuard<'_, BTreeMap<GapKey, GapRecord>>> {
        self.gaps
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn finish_claim(
        &self,
        consumer_class: &str,
        batch_id: &str,
        status: ClaimStatus,
        reason: Option<&str>,
    ) -> CoordResult<bool> {
        let mut claims = self.write_claims()?;
        let claim = claims
            .get_mut(&(consumer_class.to_string(), batch_id.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                entity: EntityKind::Claim,
                key: format!("{}/{}", consumer_class, batch_id),
            })?;

        if claim.status.is_terminal() {
            return Ok(false);
        }

        claim.status = status;
        claim.completed_at = Some(Utc::now());
        claim.failure_reason = reason.map(str::to_string);
        Ok(true)
    }
}

/// Key range covering every gap of one consumer class.
fn class_gap_bounds(consumer_class: &str) -> std::ops::RangeInclusive<GapKey> {
    (consumer_class.to_string(), Tick::MIN)..=(consumer_class.to_string(), Tick::MAX)
}

#[async_trait]
impl ClaimStore for InMemoryCoordinationStore {
    async fn try_claim(
        &self,
        consumer_class: &str,
        batch: &BatchDescriptor,
    ) -> CoordResult<ClaimOutcome> {
        let mut claims = self.write_claims()?;
        let key = (consumer_class.to_string(), batch.id.clone());
        if claims.contains_key(&key) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }
        claims.insert(key, ClaimRecord::claimed(consumer_class, batch, Utc::now()));
        Ok(ClaimOutcome::Claimed)
    }

    async fn mark_completed(&self, consumer_class: &str, batch_id: &str) -> CoordResult<bool> {
        self.finish_claim(consumer_class, batch_id, ClaimStatus::Completed, None)
    }

    async fn mark_failed(
        &self,
        consumer_class: &str,
        batch_id: &str,
        reason: &str,
    ) -> CoordResult<bool> {
        self.finish_claim(consumer_class, batch_id, ClaimStatus::Failed, Some(reason))
    }

    async fn max_completed_end(&self, consumer_class: &str) -> CoordResult<Option<Tick>> {
        let claims = self.read_claims()?;
        Ok(claims
            .values()
            .filter(|c| c.consumer_class == consumer_class && c.status == ClaimStatus::Completed)
            .map(|c| c.tick_end)
            .max())
    }

    async fn claims_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<ClaimRecord>> {
        let claims = self.read_claims()?;
        let mut rows: Vec<ClaimRecord> = claims
            .values()
            .filter(|c| {
                c.consumer_class == consumer_class
                    && c.tick_start < range.end
                    && c.tick_end >= range.start
            })
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.tick_start);
        Ok(rows)
    }

    async fn claim_get(
        &self,
        consumer_class: &str,
        batch_id: &str,
    ) -> CoordResult<Option<ClaimRecord>> {
        let claims = self.read_claims()?;
        Ok(claims
            .get(&(consumer_class.to_string(), batch_id.to_string()))
            .cloned())
    }

    async fn claim_counts(&self, consumer_class: &str) -> CoordResult<ClaimCounts> {
        let claims = self.read_claims()?;
        let mut counts = ClaimCounts::default();
        for claim in claims.values().filter(|c| c.consumer_class == consumer_class) {
            match claim.status {
                ClaimStatus::Claimed => counts.claimed += 1,
                ClaimStatus::Completed => counts.completed += 1,
                ClaimStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl GapStore for InMemoryCoordinationStore {
    async fn record_gap(
        &self,
        consumer_class: &str,
        range: TickRange,
        detected_at: Timestamp,
    ) -> CoordResult<bool> {
        if range.is_empty() {
            return Err(StorageError::InvalidRow {
                entity: EntityKind::Gap,
                reason: format!("empty gap {}", range),
            }
            .into());
        }

        let mut gaps = self.write_gaps()?;
        let key = (consumer_class.to_string(), range.start);
        if gaps.contains_key(&key) {
            return Ok(false);
        }
        gaps.insert(key, GapRecord::pending(consumer_class, range, detected_at));
        Ok(true)
    }

    async fn record_uncovered(
        &self,
        consumer_class: &str,
        candidate: TickRange,
        covered: &[TickRange],
        detected_at: Timestamp,
    ) -> CoordResult<Vec<TickRange>> {
        let mut gaps = self.write_gaps()?;
        let mut taken: Vec<TickRange> = gaps
            .range(class_gap_bounds(consumer_class))
            .map(|(_, gap)| gap.range())
            .filter(|range| range.intersects(&candidate))
            .collect();
        taken.extend_from_slice(covered);

        let missing = subtract_covered(candidate, &taken);
        for range in &missing {
            gaps.insert(
                (consumer_class.to_string(), range.start),
                GapRecord::pending(consumer_class, *range, detected_at),
            );
        }
        Ok(missing)
    }

    async fn oldest_pending_gap(&self, consumer_class: &str) -> CoordResult<Option<GapRecord>> {
        let gaps = self.read_gaps()?;
        Ok(gaps
            .range(class_gap_bounds(consumer_class))
            .map(|(_, gap)| gap)
            .find(|gap| gap.status == GapStatus::Pending)
            .cloned())
    }

    async fn gaps_in_range(
        &self,
        consumer_class: &str,
        range: TickRange,
    ) -> CoordResult<Vec<GapRecord>> {
        let gaps = self.read_gaps()?;
        Ok(gaps
            .range(class_gap_bounds(consumer_class))
            .map(|(_, gap)| gap)
            .filter(|gap| gap.range().intersects(&range))
            .cloned()
            .collect())
    }

    async fn split_gap(
        &self,
        consumer_class: &str,
        original_gap_start: Tick,
        found: TickRange,
    ) -> CoordResult<Option<GapSplit>> {
        let mut gaps = self.write_gaps()?;
        let Some(original) = gaps.remove(&(consumer_class.to_string(), original_gap_start)) else {
            return Ok(None);
        };

        let split = split_gap(original.range(), found);
        for successor in split.successors() {
            gaps.insert(
                (consumer_class.to_string(), successor.start),
                GapRecord {
                    consumer_class: consumer_class.to_string(),
                    gap_start: successor.start,
                    gap_end: successor.end,
                    first_detected: original.first_detected,
                    status: original.status,
                },
            );
        }
        Ok(Some(split))
    }

    async fn mark_permanent(&self, consumer_class: &str, gap_start: Tick) -> CoordResult<bool> {
        let mut gaps = self.write_gaps()?;
        match gaps.get_mut(&(consumer_class.to_string(), gap_start)) {
            Some(gap) if gap.status == GapStatus::Pending => {
                gap.status = GapStatus::Permanent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_gaps(&self, consumer_class: &str) -> CoordResult<Vec<GapRecord>> {
        let gaps = self.read_gaps()?;
        Ok(gaps
            .range(class_gap_bounds(consumer_class))
            .map(|(_, gap)| gap.clone())
            .collect())
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn health_check(&self) -> CoordResult<bool> {
        Ok(!self.claims.is_poisoned() && !self.gaps.is_poisoned())
    }
}

// =============================================================================
// TESTS
// =============================================================================
