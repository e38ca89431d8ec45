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

//! Merge settings shared by every interval timeline of a process.

use serde::{Deserialize, Serialize};

/// Settings applied to every interval timeline.
///
/// The merge tolerance is always explicit, so this type has no `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Maximum gap, in milliseconds, between two same-status issues that
    /// still fuses them into one.
    pub merge_tolerance_ms: u64,

    /// Store an untouched candidate verbatim (keeping its id).
    /// When false every stored issue is a fresh-id copy.
    #[serde(default = "default_keep_ids")]
    pub keep_ids: bool,
}

fn default_keep_ids() -> bool {
    true
}

impl MergeSettings {
    pub fn new(merge_tolerance_ms: u64) -> Self {
        Self {
            merge_tolerance_ms,
            keep_ids: default_keep_ids(),
        }
    }

    pub fn with_keep_ids(mut self, keep_ids: bool) -> Self {
        self.keep_ids = keep_ids;
        self
    }

    /// Tolerance as a signed duration, ready for timestamp arithmetic.
    pub fn merge_tolerance(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.merge_tolerance_ms).unwrap_or(i64::MAX))
    }
}
