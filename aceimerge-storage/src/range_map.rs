// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Boolean Range Map - Interval Merge Engine
//!
//! Keeps the current truth for one (channel, issue type) as an ordered set of
//! disjoint half-open intervals, keyed by start time.
//!
//! ## Merge rules
//!
//! - Same-status issues separated by a gap of at most the merge tolerance are
//!   fused into one issue with a fresh id.
//! - An issue never overrides time that is already covered. When it overlaps
//!   stored entries (of either status) only the uncovered gaps of its span are
//!   inserted, each gap going through the regular fusion rules.
//! - Opposite-status entries are never altered, touching or not.
//!
//! ```text
//! stored:    [====T====)      [==F==)        [===T===)
//! candidate:      [~~~~~~~~~~~~~~T~~~~~~~~~~~~~~)
//! result:    [=======T=======)[==F==)[=======T=======)
//! ```
//!
//! Every `put` returns the [`Update`] needed to bring the persisted state in
//! line with the map.

use crate::put_stats::PutStats;
use aceimerge_core::{AceiError, BooleanIssue, ChannelKey, MergeSettings, Result, Update};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound::{Excluded, Unbounded};
use tracing::{debug, warn};

type Instant = DateTime<Utc>;

/// Interval timeline for a single channel and issue type.
#[derive(Debug)]
pub struct BooleanRangeMap {
    key: ChannelKey,
    settings: MergeSettings,
    entries: BTreeMap<Instant, BooleanIssue>,
    stats: PutStats,
}

impl BooleanRangeMap {
    pub fn new(key: ChannelKey, settings: MergeSettings) -> Self {
        Self {
            key,
            settings,
            entries: BTreeMap::new(),
            stats: PutStats::default(),
        }
    }

    /// Applies `candidate` to the timeline and returns what changed.
    ///
    /// Fails with [`AceiError::InvalidArgument`] (and leaves the map untouched)
    /// when the candidate belongs to another channel or issue type. Fails with
    /// [`AceiError::InvariantViolation`] if the timeline ends up overlapping.
    pub fn put(&mut self, candidate: BooleanIssue) -> Result<Update> {
        self.check_key(&candidate)?;

        let covered = self.covered_spans(candidate.start_time(), candidate.end_time());
        if covered.is_empty() {
            let keep_id = self.settings.keep_ids;
            return self.put_disjoint(candidate, keep_id, true);
        }

        self.stats.record_conflict();

        let mut update = Update::empty();
        for (start, end) in uncovered_gaps(candidate.start_time(), candidate.end_time(), &covered) {
            let piece = candidate.with_span(start, end)?;
            update = update.merge(self.put_disjoint(piece, true, false)?);
        }

        if update.is_empty() {
            debug!(
                channel = %self.key.channel_name,
                issue_type = ?self.key.issue_type,
                id = %candidate.id(),
                "Issue already covered, nothing to store"
            );
        } else {
            warn!(
                channel = %self.key.channel_name,
                issue_type = ?self.key.issue_type,
                id = %candidate.id(),
                inserted = update.inserted().len(),
                removed = update.removed().len(),
                "Issue overlaps stored entries, kept uncovered gaps only"
            );
        }

        Ok(update)
    }

    /// Entry covering `instant`, or the entry ending exactly at `instant`.
    pub fn get(&self, instant: Instant) -> Option<&BooleanIssue> {
        let (_, floor) = self.entries.range(..=instant).next_back()?;
        if floor.contains(instant) || floor.end_time() == instant {
            Some(floor)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops entries ending at or before `instant` and truncates the one
    /// straddling it. Returns the number of dropped entries.
    ///
    /// Nothing here is reported as an [`Update`]: retention only bounds the
    /// in-memory footprint.
    pub fn clear_before(&mut self, instant: Instant) -> usize {
        let kept = self.entries.split_off(&instant);
        let expired = std::mem::replace(&mut self.entries, kept);

        let mut dropped = 0;
        for (_, issue) in expired {
            if issue.end_time() > instant {
                if let Ok(truncated) = issue.truncated_to(instant) {
                    self.entries.insert(instant, truncated);
                    continue;
                }
            }
            dropped += 1;
        }
        dropped
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored issues in start order.
    pub fn entries(&self) -> impl Iterator<Item = &BooleanIssue> {
        self.entries.values()
    }

    /// Snapshot of the merge statistics, optionally resetting them.
    pub fn put_stats(&mut self, reset: bool) -> PutStats {
        if reset {
            std::mem::take(&mut self.stats)
        } else {
            self.stats.clone()
        }
    }

    fn check_key(&self, candidate: &BooleanIssue) -> Result<()> {
        if candidate.channel_name() != self.key.channel_name {
            return Err(AceiError::InvalidArgument(format!(
                "Cannot insert ACEI, channel name {} does not match expected {}",
                candidate.channel_name(),
                self.key.channel_name
            )));
        }
        if candidate.issue_type() != self.key.issue_type {
            return Err(AceiError::InvalidArgument(format!(
                "Cannot insert ACEI, type {:?} does not match expected {:?}",
                candidate.issue_type(),
                self.key.issue_type
            )));
        }
        Ok(())
    }

    /// Spans of stored entries overlapping `[start, end)`, in order.
    fn covered_spans(&self, start: Instant, end: Instant) -> Vec<(Instant, Instant)> {
        let mut spans = Vec::new();
        if let Some((_, prev)) = self.entries.range(..start).next_back() {
            if prev.end_time() > start {
                spans.push((prev.start_time(), prev.end_time()));
            }
        }
        spans.extend(
            self.entries
                .range(start..end)
                .map(|(_, issue)| (issue.start_time(), issue.end_time())),
        );
        spans
    }

    /// Inserts a candidate that overlaps nothing, fusing it with same-status
    /// neighbours within tolerance on both sides.
    ///
    /// With `record_stats`, a fusion with the immediately preceding neighbour
    /// counts as one merge with that gap.
    fn put_disjoint(
        &mut self,
        candidate: BooleanIssue,
        keep_id: bool,
        record_stats: bool,
    ) -> Result<Update> {
        let tolerance = self.settings.merge_tolerance();
        let status = candidate.status();
        let (mut lo, mut hi) = (candidate.start_time(), candidate.end_time());
        let mut fused: Vec<BooleanIssue> = Vec::new();

        while let Some((_, prev)) = self.entries.range(..lo).next_back() {
            let gap = lo - prev.end_time();
            if prev.status() != status || gap > tolerance {
                break;
            }
            if record_stats && fused.is_empty() {
                self.stats.record_merge(gap.num_milliseconds());
            }
            lo = prev.start_time();
            fused.push(prev.clone());
        }

        while let Some((_, next)) = self.entries.range(hi..).next() {
            let gap = next.start_time() - hi;
            if next.status() != status || gap > tolerance {
                break;
            }
            hi = next.end_time();
            fused.push(next.clone());
        }

        let stored = if fused.is_empty() && keep_id {
            candidate
        } else {
            candidate.with_span(lo, hi)?
        };

        for issue in &fused {
            self.entries.remove(&issue.start_time());
        }
        if let Some(displaced) = self.entries.insert(stored.start_time(), stored.clone()) {
            return Err(AceiError::InvariantViolation(format!(
                "{} displaced {} in timeline {}",
                stored, displaced, self.key
            )));
        }
        self.check_neighbours(&stored)?;

        debug!(
            channel = %self.key.channel_name,
            issue_type = ?self.key.issue_type,
            id = %stored.id(),
            fused = fused.len(),
            "Stored issue"
        );

        Ok(Update::new(HashSet::from([stored]), fused.into_iter().collect()))
    }

    fn check_neighbours(&self, stored: &BooleanIssue) -> Result<()> {
        let start = stored.start_time();
        if let Some((_, prev)) = self.entries.range(..start).next_back() {
            if prev.end_time() > start {
                return Err(AceiError::InvariantViolation(format!(
                    "{} overlaps {} in timeline {}",
                    prev, stored, self.key
                )));
            }
        }
        if let Some((_, next)) = self.entries.range((Excluded(start), Unbounded)).next() {
            if next.start_time() < stored.end_time() {
                return Err(AceiError::InvariantViolation(format!(
                    "{} overlaps {} in timeline {}",
                    stored, next, self.key
                )));
            }
        }
        Ok(())
    }
}

/// Parts of `[start, end)` not covered by `covered` (sorted, disjoint).
fn uncovered_gaps(start: Instant, end: Instant, covered: &[(Instant, Instant)]) -> Vec<(Instant, Instant)> {
    let mut gaps = Vec::new();
    let mut cursor = start;
    for &(covered_start, covered_end) in covered {
        if covered_start > cursor {
            gaps.push((cursor, covered_start.min(end)));
        }
        cursor = cursor.max(covered_end);
        if cursor >= end {
            return gaps;
        }
    }
    if cursor < end {
        gaps.push((cursor, end));
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use aceimerge_core::IssueType;
    use chrono::TimeZone;

    const CHANNEL: &str = "ASAR.AS01.SHZ";

    fn at(ms: i64) -> Instant {
        Utc.timestamp_millis_opt(1_600_000_000_000 + ms).unwrap()
    }

    fn secs(s: i64) -> i64 {
        s * 1000
    }

    fn issue(start_ms: i64, end_ms: i64, status: bool) -> BooleanIssue {
        BooleanIssue::synthesize(CHANNEL, IssueType::VaultDoorOpened, at(start_ms), at(end_ms), status)
            .unwrap()
    }

    fn map(tolerance_ms: u64) -> BooleanRangeMap {
        BooleanRangeMap::new(
            ChannelKey::new(CHANNEL, IssueType::VaultDoorOpened),
            MergeSettings::new(tolerance_ms),
        )
    }

    fn spans(map: &BooleanRangeMap) -> Vec<(Instant, Instant, bool)> {
        map.entries()
            .map(|i| (i.start_time(), i.end_time(), i.status()))
            .collect()
    }

    fn only(set: &HashSet<BooleanIssue>) -> &BooleanIssue {
        assert_eq!(set.len(), 1, "expected exactly one issue, got {set:?}");
        set.iter().next().unwrap()
    }

    #[test]
    fn test_rejects_mismatched_channel_and_type() {
        let mut m = map(1000);
        let wrong_channel =
            BooleanIssue::synthesize("OTHER.CH", IssueType::VaultDoorOpened, at(0), at(10), true)
                .unwrap();
        let wrong_type =
            BooleanIssue::synthesize(CHANNEL, IssueType::ClockLocked, at(0), at(10), true).unwrap();

        match m.put(wrong_channel) {
            Err(AceiError::InvalidArgument(msg)) => assert!(msg.contains("channel name OTHER.CH")),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(m.put(wrong_type), Err(AceiError::InvalidArgument(_))));
        assert!(m.is_empty());
    }

    #[test]
    fn test_first_put_is_stored_verbatim() {
        let mut m = map(1000);
        let a = issue(0, secs(5), true);
        let update = m.put(a.clone()).unwrap();

        assert_eq!(only(update.inserted()).id(), a.id());
        assert!(update.removed().is_empty());
        assert_eq!(m.size(), 1);
    }

    #[test]
    fn test_gap_equal_to_tolerance_fuses() {
        let mut m = map(1000);
        let a = issue(0, secs(5), true);
        let b = issue(secs(6), secs(11), true);
        m.put(a.clone()).unwrap();
        let update = m.put(b.clone()).unwrap();

        assert_eq!(update.removed(), &HashSet::from([a.clone()]));
        let fused = only(update.inserted());
        assert_ne!(fused.id(), a.id());
        assert_ne!(fused.id(), b.id());
        assert_eq!((fused.start_time(), fused.end_time()), (at(0), at(secs(11))));
        assert_eq!(m.size(), 1);
    }

    #[test]
    fn test_gap_beyond_tolerance_does_not_fuse() {
        let mut m = map(1000);
        let a = issue(0, secs(5), true);
        let b = issue(secs(6) + 1, secs(11), true);
        m.put(a).unwrap();
        let update = m.put(b.clone()).unwrap();

        assert!(update.removed().is_empty());
        assert_eq!(only(update.inserted()).id(), b.id());
        assert_eq!(m.size(), 2);
    }

    #[test]
    fn test_touching_opposite_statuses_stay_apart() {
        let mut m = map(1000);
        let a = issue(0, secs(5), true);
        let b = issue(secs(5), secs(10), false);
        m.put(a).unwrap();
        let update = m.put(b.clone()).unwrap();

        assert!(update.removed().is_empty());
        assert_eq!(only(update.inserted()).id(), b.id());
        assert_eq!(
            spans(&m),
            vec![
                (at(0), at(secs(5)), true),
                (at(secs(5)), at(secs(10)), false)
            ]
        );
    }

    #[test]
    fn test_touching_same_statuses_fuse() {
        let mut m = map(0);
        m.put(issue(0, secs(5), true)).unwrap();
        let update = m.put(issue(secs(5), secs(10), true)).unwrap();

        assert_eq!(update.removed().len(), 1);
        assert_eq!(spans(&m), vec![(at(0), at(secs(10)), true)]);
    }

    #[test]
    fn test_filling_the_gap_fuses_three_entries() {
        let mut m = map(1000);
        let a = issue(0, secs(5), true);
        let c = issue(secs(10), secs(15), true);
        m.put(a.clone()).unwrap();
        m.put(c.clone()).unwrap();
        assert_eq!(m.size(), 2);

        let update = m.put(issue(secs(5), secs(10), true)).unwrap();

        assert_eq!(update.removed(), &HashSet::from([a, c]));
        let fused = only(update.inserted());
        assert_eq!((fused.start_time(), fused.end_time()), (at(0), at(secs(15))));
        assert_eq!(m.size(), 1);
    }

    #[test]
    fn test_gap_fill_between_opposite_neighbours() {
        let mut m = map(1000);
        m.put(issue(0, secs(5), true)).unwrap();
        m.put(issue(secs(11), secs(16), true)).unwrap();

        let candidate = issue(secs(4), secs(12), false);
        let update = m.put(candidate.clone()).unwrap();

        assert!(update.removed().is_empty());
        let filled = only(update.inserted());
        assert_ne!(filled.id(), candidate.id());
        assert_eq!(
            (filled.start_time(), filled.end_time(), filled.status()),
            (at(secs(5)), at(secs(11)), false)
        );
        assert_eq!(m.size(), 3);
    }

    #[test]
    fn test_covered_candidate_is_a_no_op() {
        let mut m = map(1000);
        let a = issue(0, secs(10), true);
        m.put(a.clone()).unwrap();

        assert!(m.put(issue(secs(2), secs(8), true)).unwrap().is_empty());
        assert!(m.put(issue(secs(2), secs(8), false)).unwrap().is_empty());
        assert!(m.put(a.clone()).unwrap().is_empty());
        assert_eq!(m.entries().next().map(|i| i.id()), Some(a.id()));
    }

    #[test]
    fn test_opposite_put_over_alternating_entries_changes_nothing() {
        let mut m = map(1000);
        for i in 0..6 {
            m.put(issue(secs(i * 5), secs(i * 5 + 5), i % 2 == 0)).unwrap();
        }
        assert_eq!(m.size(), 6);

        let update = m.put(issue(0, secs(30), false)).unwrap();
        assert!(update.is_empty());
        assert_eq!(m.size(), 6);
    }

    #[test]
    fn test_overlap_fills_every_gap_between_opposite_entries() {
        let num_aceis = 6;
        let minute = secs(60);
        let mut m = map(1000);
        for i in 0..num_aceis {
            m.put(issue(i * 5 * minute, (i * 5 + 3) * minute, false)).unwrap();
        }

        let last_end = ((num_aceis - 1) * 5 + 3) * minute;
        let update = m.put(issue(0, last_end, true)).unwrap();
        assert_eq!(update.inserted().len() as i64, num_aceis - 1);
        assert!(update.removed().is_empty());
        assert!(update.inserted().iter().all(|i| i.status()));

        let mut widened = map(1000);
        for i in 0..num_aceis {
            widened
                .put(issue(i * 5 * minute, (i * 5 + 3) * minute, false))
                .unwrap();
        }
        let update = widened.put(issue(-minute, last_end + minute, true)).unwrap();
        assert_eq!(update.inserted().len() as i64, num_aceis + 1);
        assert!(update.removed().is_empty());
    }

    #[test]
    fn test_gap_pieces_chain_into_one_fused_issue() {
        let mut m = map(1000);
        let a = issue(0, secs(5), true);
        let b = issue(secs(7), secs(9), true);
        m.put(a.clone()).unwrap();
        m.put(b.clone()).unwrap();

        let update = m.put(issue(secs(4), secs(12), true)).unwrap();

        assert_eq!(update.removed(), &HashSet::from([a, b]));
        let fused = only(update.inserted());
        assert_eq!((fused.start_time(), fused.end_time()), (at(0), at(secs(12))));
        assert_eq!(m.size(), 1);
        assert_eq!(m.entries().next().map(|i| i.id()), Some(fused.id()));
    }

    #[test]
    fn test_keep_ids_disabled_stores_fresh_copy() {
        let mut m = BooleanRangeMap::new(
            ChannelKey::new(CHANNEL, IssueType::VaultDoorOpened),
            MergeSettings::new(1000).with_keep_ids(false),
        );
        let a = issue(0, secs(5), true);
        let update = m.put(a.clone()).unwrap();

        let stored = only(update.inserted());
        assert_ne!(stored.id(), a.id());
        assert_eq!((stored.start_time(), stored.end_time()), (a.start_time(), a.end_time()));
    }

    #[test]
    fn test_get_falls_back_to_entry_ending_at_instant() {
        let mut m = map(0);
        let a = issue(0, secs(5), true);
        let b = issue(secs(10), secs(15), false);
        m.put(a.clone()).unwrap();
        m.put(b.clone()).unwrap();

        assert_eq!(m.get(at(0)), Some(&a));
        assert_eq!(m.get(at(secs(3))), Some(&a));
        assert_eq!(m.get(at(secs(5))), Some(&a));
        assert_eq!(m.get(at(secs(7))), None);
        assert_eq!(m.get(at(secs(12))), Some(&b));
        assert_eq!(m.get(at(-1)), None);
    }

    #[test]
    fn test_clear_before_drops_and_truncates() {
        let mut m = map(1000);
        let mut issues = Vec::new();
        for i in 0..11 {
            let start = secs(i * 7);
            let acei = issue(start, start + secs(5), true);
            issues.push(acei.clone());
            m.put(acei).unwrap();
        }
        assert_eq!(m.size(), 11);

        let dropped = m.clear_before(at(secs(37)));
        assert_eq!(dropped, 5);
        assert_eq!(m.size(), 6);

        let first = m.entries().next().unwrap().clone();
        assert_eq!(first.id(), issues[5].id());
        assert_eq!(first.start_time(), at(secs(37)));
        assert_eq!(first.end_time(), at(secs(40)));
        assert!(m.entries().all(|i| i.end_time() > at(secs(37))));

        m.clear();
        assert!(m.is_empty());
    }

    #[test]
    fn test_put_stats_count_conflicts_and_merges() {
        let mut m = map(1000);
        m.put(issue(0, secs(5), true)).unwrap();
        m.put(issue(secs(5) + 400, secs(8), true)).unwrap();
        m.put(issue(secs(1), secs(2), false)).unwrap();

        let stats = m.put_stats(true);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.merges, 1);
        assert_eq!(stats.min_gap_ms, Some(400));
        assert_eq!(m.put_stats(false), PutStats::default());

        // Fusing only with the following neighbour is not a merge.
        m.put(issue(secs(10), secs(12), true)).unwrap();
        m.put(issue(secs(9) + 200, secs(9) + 600, true)).unwrap();
        assert_eq!(m.put_stats(true).merges, 0);

        // Gap pieces of a conflicting put are not merges either.
        m.put(issue(secs(20), secs(22), true)).unwrap();
        m.put(issue(secs(22) + 300, secs(25), true)).unwrap();
        m.put_stats(true);
        m.put(issue(secs(12), secs(24), true)).unwrap();
        let stats = m.put_stats(true);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.merges, 0);
        assert_eq!(stats.min_gap_ms, None);
    }

    #[test]
    fn test_uncovered_gaps() {
        let covered = vec![(at(2), at(4)), (at(6), at(8))];
        assert_eq!(
            uncovered_gaps(at(0), at(10), &covered),
            vec![(at(0), at(2)), (at(4), at(6)), (at(8), at(10))]
        );
        assert_eq!(uncovered_gaps(at(3), at(7), &covered), vec![(at(4), at(6))]);
        assert!(uncovered_gaps(at(2), at(4), &covered).is_empty());
    }
}
