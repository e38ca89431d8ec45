// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Source delivery handles.
//!
//! Every record arrives with a handle for its position in the source stream.
//! The flusher acknowledges a handle only after the flush holding the
//! record's effects has fully succeeded, so the source must tolerate
//! at-least-once redelivery.

use aceimerge_core::{AceiError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    fn partition(&self) -> i32 {
        0
    }

    fn offset(&self) -> i64;

    async fn acknowledge(&self) -> Result<()>;
}

pub type SharedHandle = Arc<dyn DeliveryHandle>;

/// A record paired with its delivery handle.
#[derive(Clone)]
pub struct Delivery<T> {
    pub issue: T,
    pub handle: SharedHandle,
}

impl<T> Delivery<T> {
    pub fn new(issue: T, handle: SharedHandle) -> Self {
        Self { issue, handle }
    }
}

/// Committed offsets per partition, advanced by acknowledgements.
///
/// An offset is committed only once every offset handed out below it on the
/// same partition has been acknowledged too, so records acknowledged out of
/// order never move the commit past one that is still in flight.
#[derive(Default)]
pub struct OffsetLedger {
    partitions: DashMap<i32, PartitionOffsets>,
    acknowledged: AtomicU64,
}

#[derive(Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    acknowledged: BTreeSet<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    fn advance(&mut self) {
        let ready = match self.in_flight.first() {
            Some(&lowest) => self.acknowledged.range(..lowest).next_back().copied(),
            None => self.acknowledged.last().copied(),
        };
        if let Some(offset) = ready {
            self.committed = Some(self.committed.map_or(offset, |current| current.max(offset)));
            self.acknowledged.retain(|&acked| acked > offset);
        }
    }
}

impl OffsetLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle for `offset` on `partition`, committing into this ledger.
    ///
    /// The offset stays in flight, holding back the commit of higher
    /// offsets, until the handle is acknowledged.
    pub fn handle(self: &Arc<Self>, partition: i32, offset: i64) -> SharedHandle {
        self.partitions
            .entry(partition)
            .or_default()
            .in_flight
            .insert(offset);
        Arc::new(LedgerHandle {
            ledger: Arc::clone(self),
            partition,
            offset,
        })
    }

    pub fn commit(&self, partition: i32, offset: i64) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        let mut offsets = self.partitions.entry(partition).or_default();
        offsets.in_flight.remove(&offset);
        offsets.acknowledged.insert(offset);
        offsets.advance();
    }

    /// Highest offset below which everything handed out has been acknowledged.
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.partitions
            .get(&partition)
            .and_then(|offsets| offsets.committed)
    }

    /// Total acknowledgements received.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }
}

struct LedgerHandle {
    ledger: Arc<OffsetLedger>,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl DeliveryHandle for LedgerHandle {
    fn partition(&self) -> i32 {
        self.partition
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    async fn acknowledge(&self) -> Result<()> {
        if self.offset < 0 {
            return Err(AceiError::Acknowledge(format!(
                "invalid offset {} on partition {}",
                self.offset, self.partition
            )));
        }
        self.ledger.commit(self.partition, self.offset);
        Ok(())
    }
}
