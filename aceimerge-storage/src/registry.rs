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

//! Store Registry - one range map per (channel, issue type)
//!
//! A DashMap hands out `Arc<Mutex<BooleanRangeMap>>` handles. Creation goes
//! through the entry API so concurrent first access for the same key always
//! observes a single instance. Each map is mutated only while its mutex is
//! held, which serializes puts per key without a global lock.

use crate::put_stats::PutStats;
use crate::range_map::BooleanRangeMap;
use aceimerge_core::{BooleanIssue, ChannelKey, IssueType, MergeSettings, Result, Update};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub type SharedRangeMap = Arc<Mutex<BooleanRangeMap>>;

pub struct StoreRegistry {
    settings: MergeSettings,
    stores: DashMap<ChannelKey, SharedRangeMap>,
}

impl StoreRegistry {
    pub fn new(settings: MergeSettings) -> Self {
        Self {
            settings,
            stores: DashMap::new(),
        }
    }

    /// Range map for the key, created empty on first access.
    pub fn get(&self, channel_name: &str, issue_type: IssueType) -> SharedRangeMap {
        let key = ChannelKey::new(channel_name, issue_type);
        if let Some(existing) = self.stores.get(&key) {
            return existing.value().clone();
        }

        self.stores
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(channel = %key.channel_name, issue_type = ?key.issue_type, "Creating range map");
                Arc::new(Mutex::new(BooleanRangeMap::new(key, self.settings.clone())))
            })
            .value()
            .clone()
    }

    /// Routes `issue` to its range map and applies it under the key's lock.
    pub fn put(&self, issue: BooleanIssue) -> Result<Update> {
        let store = self.get(issue.channel_name(), issue.issue_type());
        let mut guard = store.lock();
        guard.put(issue)
    }

    /// Number of keys with a range map.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.stores.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Live issues across every range map.
    pub fn total_entries(&self) -> usize {
        self.handles().iter().map(|store| store.lock().size()).sum()
    }

    /// Retention sweep over every range map. Returns the number of dropped issues.
    pub fn clear_before(&self, instant: DateTime<Utc>) -> usize {
        self.handles()
            .iter()
            .map(|store| store.lock().clear_before(instant))
            .sum()
    }

    /// Aggregated merge statistics since the previous call.
    pub fn take_put_stats(&self) -> PutStats {
        let mut total = PutStats::default();
        for store in self.handles() {
            total.absorb(&store.lock().put_stats(true));
        }
        total
    }

    // Clone the handles out first so no shard lock is held while a map lock is taken.
    fn handles(&self) -> Vec<SharedRangeMap> {
        self.stores.iter().map(|e| e.value().clone()).collect()
    }
}
