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

//! Timeline state transitions produced by a single `put`.

use crate::issue::BooleanIssue;
use std::collections::HashSet;

/// Issues to persist and issues to delete so the downstream store matches
/// the in-memory timeline again.
///
/// `inserted` and `removed` are always disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    inserted: HashSet<BooleanIssue>,
    removed: HashSet<BooleanIssue>,
}

impl Update {
    pub fn new(inserted: HashSet<BooleanIssue>, removed: HashSet<BooleanIssue>) -> Self {
        let inserted = inserted.difference(&removed).cloned().collect();
        Self { inserted, removed }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn inserted_only(issue: BooleanIssue) -> Self {
        Self {
            inserted: HashSet::from([issue]),
            removed: HashSet::new(),
        }
    }

    pub fn inserted(&self) -> &HashSet<BooleanIssue> {
        &self.inserted
    }

    pub fn removed(&self) -> &HashSet<BooleanIssue> {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.removed.len()
    }

    pub fn into_parts(self) -> (HashSet<BooleanIssue>, HashSet<BooleanIssue>) {
        (self.inserted, self.removed)
    }

    /// Composes `next`, applied after `self`, into one transition.
    ///
    /// An issue inserted here and removed by `next` never reaches the store,
    /// so it drops out of both sets. `removed` keeps only issues that existed
    /// before `self` was applied.
    pub fn merge(self, next: Update) -> Update {
        let (mut inserted, mut removed) = self.into_parts();
        let (next_inserted, next_removed) = next.into_parts();

        for issue in next_removed {
            if !inserted.remove(&issue) {
                removed.insert(issue);
            }
        }
        inserted.extend(next_inserted);

        Update { inserted, removed }
    }
}
