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

//! Merge statistics collected by each timeline and logged periodically.

use serde::Serialize;
use std::fmt;

/// Counters for one timeline (or an aggregate of several).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PutStats {
    /// Puts whose span overlapped issues already stored.
    pub conflicts: u64,
    /// Same-status fusions across a gap (gap of zero included).
    pub merges: u64,
    pub min_gap_ms: Option<i64>,
    pub max_gap_ms: Option<i64>,
    total_gap_ms: i64,
}

impl PutStats {
    pub fn record_conflict(&mut self) {
        self.conflicts += 1;
    }

    pub fn record_merge(&mut self, gap_ms: i64) {
        self.merges += 1;
        self.total_gap_ms = self.total_gap_ms.saturating_add(gap_ms);
        self.min_gap_ms = Some(self.min_gap_ms.map_or(gap_ms, |m| m.min(gap_ms)));
        self.max_gap_ms = Some(self.max_gap_ms.map_or(gap_ms, |m| m.max(gap_ms)));
    }

    pub fn mean_gap_ms(&self) -> Option<f64> {
        if self.merges == 0 {
            None
        } else {
            Some(self.total_gap_ms as f64 / self.merges as f64)
        }
    }

    /// Folds `other` into `self`.
    pub fn absorb(&mut self, other: &PutStats) {
        self.conflicts += other.conflicts;
        self.merges += other.merges;
        self.total_gap_ms = self.total_gap_ms.saturating_add(other.total_gap_ms);
        self.min_gap_ms = match (self.min_gap_ms, other.min_gap_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_gap_ms = match (self.max_gap_ms, other.max_gap_ms) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts == 0 && self.merges == 0
    }
}

impl fmt::Display for PutStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conflicts={} merges={}", self.conflicts, self.merges)?;
        if let (Some(min), Some(max), Some(mean)) =
            (self.min_gap_ms, self.max_gap_ms, self.mean_gap_ms())
        {
            write!(f, " gap_ms(min={} mean={:.1} max={})", min, mean, max)?;
        }
        Ok(())
    }
}
