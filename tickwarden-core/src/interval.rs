//! Half-open tick interval arithmetic used by the gap tracker.

use crate::{Tick, EXPECTED_ORIGIN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Half-open tick range `[start, end)`. Empty when `start >= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TickRange {
    pub start: Tick,
    pub end: Tick,
}

impl TickRange {
    pub const fn new(start: Tick, end: Tick) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Number of tick units spanned (zero for empty ranges).
    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn contains(&self, tick: Tick) -> bool {
        self.start <= tick && tick < self.end
    }

    pub fn intersects(&self, other: &TickRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    pub fn intersection(&self, other: &TickRange) -> Option<TickRange> {
        let range = TickRange::new(self.start.max(other.start), self.end.min(other.end));
        (!range.is_empty()).then_some(range)
    }
}

impl fmt::Display for TickRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The tick the next batch should start at, given the highest completed
/// inclusive `tick_end` for a consumer class.
pub fn expected_next_tick(max_completed_end: Option<Tick>, sampling_interval: i64) -> Tick {
    match max_completed_end {
        Some(end) => end + sampling_interval,
        None => EXPECTED_ORIGIN,
    }
}

/// Successor gaps left after a found batch is carved out of a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GapSplit {
    /// `[gap.start, found.start)` when the found batch starts inside the gap.
    pub before: Option<TickRange>,
    /// `[found.end, gap.end)` when the found batch ends inside the gap.
    pub after: Option<TickRange>,
}

impl GapSplit {
    /// True when the found batch closed the gap entirely.
    pub fn is_closed(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }

    pub fn successors(&self) -> impl Iterator<Item = TickRange> {
        self.before.into_iter().chain(self.after)
    }
}

/// Carve `found` out of `gap`.
///
/// A found range that does not intersect the gap leaves it intact as a
/// single successor.
pub fn split_gap(gap: TickRange, found: TickRange) -> GapSplit {
    if !gap.intersects(&found) {
        return GapSplit {
            before: (!gap.is_empty()).then_some(gap),
            after: None,
        };
    }

    let before = (gap.start < found.start).then(|| TickRange::new(gap.start, found.start));
    let after = (found.end < gap.end).then(|| TickRange::new(found.end, gap.end));

    GapSplit { before, after }
}

/// Remove every `covered` range from `candidate`, returning the uncovered
/// pieces in ascending order.
pub fn subtract_covered(candidate: TickRange, covered: &[TickRange]) -> Vec<TickRange> {
    if candidate.is_empty() {
        return Vec::new();
    }

    let mut overlapping: Vec<TickRange> = covered
        .iter()
        .copied()
        .filter(|range| range.intersects(&candidate))
        .collect();
    overlapping.sort_by_key(|range| range.start);

    let mut pieces = Vec::new();
    let mut cursor = candidate.start;
    for range in overlapping {
        if range.start > cursor {
            pieces.push(TickRange::new(cursor, range.start));
        }
        cursor = cursor.max(range.end);
        if cursor >= candidate.end {
            break;
        }
    }
    if cursor < candidate.end {
        pieces.push(TickRange::new(cursor, candidate.end));
    }
    pieces
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_next_tick_with_history() {
        assert_eq!(expected_next_tick(Some(990), 10), 1000);
        assert_eq!(expected_next_tick(Some(1410), 10), 1420);
    }

    #[test]
    fn test_expected_next_tick_origin() {
        assert_eq!(expected_next_tick(None, 10), EXPECTED_ORIGIN);
    }

    #[test]
    fn test_split_middle_yields_two_successors() {
        let split = split_gap(TickRange::new(1000, 3000), TickRange::new(1500, 2000));
        assert_eq!(split.before, Some(TickRange::new(1000, 1500)));
        assert_eq!(split.after, Some(TickRange::new(2000, 3000)));
        assert!(!split.is_closed());
    }

    #[test]
    fn test_split_exact_cover_closes_gap() {
        let split = split_gap(TickRange::new(1000, 3000), TickRange::new(1000, 3000));
        assert!(split.is_closed());
        assert_eq!(split.successors().count(), 0);
    }

    #[test]
    fn test_split_overhanging_batch() {
        let split = split_gap(TickRange::new(1000, 2000), TickRange::new(500, 1500));
        assert_eq!(split.before, None);
        assert_eq!(split.after, Some(TickRange::new(1500, 2000)));

        let split = split_gap(TickRange::new(1000, 2000), TickRange::new(1800, 2990));
        assert_eq!(split.before, Some(TickRange::new(1000, 1800)));
        assert_eq!(split.after, None);
    }

    #[test]
    fn test_split_disjoint_batch_keeps_gap() {
        let split = split_gap(TickRange::new(1000, 2000), TickRange::new(2000, 3000));
        assert_eq!(split.successors().collect::<Vec<_>>(), vec![TickRange::new(1000, 2000)]);
    }

    #[test]
    fn test_subtract_covered_middle_hole() {
        let pieces = subtract_covered(
            TickRange::new(0, 3000),
            &[TickRange::new(1000, 2000)],
        );
        assert_eq!(pieces, vec![TickRange::new(0, 1000), TickRange::new(2000, 3000)]);
    }

    #[test]
    fn test_subtract_covered_unsorted_overlapping() {
        let pieces = subtract_covered(
            TickRange::new(0, 100),
            &[
                TickRange::new(60, 80),
                TickRange::new(10, 30),
                TickRange::new(20, 40),
                TickRange::new(90, 200),
            ],
        );
        assert_eq!(
            pieces,
            vec![
                TickRange::new(0, 10),
                TickRange::new(40, 60),
                TickRange::new(80, 90)
            ]
        );
    }

    #[test]
    fn test_subtract_covered_fully_covered() {
        let pieces = subtract_covered(TickRange::new(1000, 2000), &[TickRange::new(0, 5000)]);
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_subtract_covered_empty_candidate() {
        assert!(subtract_covered(TickRange::new(10, 10), &[]).is_empty());
    }

    #[test]
    fn test_range_display() {
        assert_eq!(TickRange::new(1420, 1430).to_string(), "[1420, 1430)");
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
