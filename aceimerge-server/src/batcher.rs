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

//! Batch flusher for merged updates
//!
//! Collects updates from the merge workers and writes them to the
//! persistence gateway in bounded chunks.
//!
//! ## Flush order
//!
//! 1. boolean inserts
//! 2. boolean removes (skipped while any insert chunk of the flush failed,
//!    so a timeline is never left uncovered in storage)
//! 3. analog inserts
//!
//! A flush fires on every `storage_period` tick, or early once the pending
//! item count reaches `min_items_to_perform_db_operations`. Delivery handles
//! are acknowledged only after a flush in which every chunk succeeded.

use crate::config::ProcessorConfig;
use crate::delivery::SharedHandle;
use crate::gateway::{GatewayError, PersistenceGateway};
use crate::metrics::{FlushMetrics, FlushMetricsSnapshot};
use aceimerge_core::{AnalogIssue, BooleanIssue, Bulkhead, RetryPolicy, Update};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Work handed from ingestion to the flusher.
pub enum FlushItem {
    /// Result of one boolean put.
    Boolean { update: Update, handle: SharedHandle },
    /// Analog record, stored as-is.
    Analog { issue: AnalogIssue, handle: SharedHandle },
    /// Record dropped upstream; only its handle still needs acknowledging.
    Skipped { handle: SharedHandle },
}

/// Configuration for the batch flusher
#[derive(Debug, Clone)]
pub struct FlusherConfig {
    /// Timer between flushes
    pub storage_period: Duration,
    /// Maximum issues per gateway call
    pub max_items_per_db_interaction: usize,
    /// Maximum gateway calls in flight
    pub max_parallel_db_operations: usize,
    /// Pending count that triggers an early flush
    pub min_items_to_perform_db_operations: usize,
    /// Delay before the single retry of a failed call
    pub retry_backoff: Duration,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            storage_period: Duration::from_millis(1000),
            max_items_per_db_interaction: 1000,
            max_parallel_db_operations: 4,
            min_items_to_perform_db_operations: 100,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl From<&ProcessorConfig> for FlusherConfig {
    fn from(config: &ProcessorConfig) -> Self {
        Self {
            storage_period: config.storage_period(),
            max_items_per_db_interaction: config.max_items_per_db_interaction,
            max_parallel_db_operations: config.max_parallel_db_operations,
            min_items_to_perform_db_operations: config.min_items_to_perform_db_operations,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Writes waiting for the next flush.
#[derive(Default)]
pub struct PendingWrites {
    inserts: HashSet<BooleanIssue>,
    removes: HashSet<BooleanIssue>,
    analogs: Vec<AnalogIssue>,
    handles: Vec<SharedHandle>,
}

impl PendingWrites {
    /// Folds an update in. Removing an issue that is still waiting to be
    /// inserted cancels both, since storage never saw it.
    pub fn add_update(&mut self, update: Update) {
        let (inserted, removed) = update.into_parts();
        for issue in removed {
            if !self.inserts.remove(&issue) {
                self.removes.insert(issue);
            }
        }
        for issue in inserted {
            self.removes.remove(&issue);
            self.inserts.insert(issue);
        }
    }

    pub fn add_analog(&mut self, issue: AnalogIssue) {
        self.analogs.push(issue);
    }

    pub fn add_handle(&mut self, handle: SharedHandle) {
        self.handles.push(handle);
    }

    pub fn inserts(&self) -> &HashSet<BooleanIssue> {
        &self.inserts
    }

    pub fn removes(&self) -> &HashSet<BooleanIssue> {
        &self.removes
    }

    pub fn analogs(&self) -> &[AnalogIssue] {
        &self.analogs
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Issues waiting to be written. Handles are not counted.
    pub fn item_count(&self) -> usize {
        self.inserts.len() + self.removes.len() + self.analogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0 && self.handles.is_empty()
    }

    /// Puts back writes from a failed flush. They are older than anything
    /// pending now, so analogs and handles go first.
    fn restore(&mut self, carried: PendingWrites) {
        let newer = std::mem::replace(self, carried);
        let PendingWrites {
            inserts,
            removes,
            analogs,
            handles,
        } = newer;

        for issue in removes {
            if !self.inserts.remove(&issue) {
                self.removes.insert(issue);
            }
        }
        for issue in inserts {
            self.removes.remove(&issue);
            self.inserts.insert(issue);
        }
        self.analogs.extend(analogs);
        self.handles.extend(handles);
    }
}

/// One gateway call's worth of issues.
#[derive(Debug, Clone)]
enum Chunk {
    Store(Vec<BooleanIssue>),
    Remove(Vec<BooleanIssue>),
    Analogs(Vec<AnalogIssue>),
}

impl Chunk {
    fn len(&self) -> usize {
        match self {
            Chunk::Store(issues) | Chunk::Remove(issues) => issues.len(),
            Chunk::Analogs(issues) => issues.len(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Chunk::Store(_) => "store_booleans",
            Chunk::Remove(_) => "remove_booleans",
            Chunk::Analogs(_) => "store_analogs",
        }
    }

    fn carry_into(self, pending: &mut PendingWrites) {
        match self {
            Chunk::Store(issues) => pending.inserts.extend(issues),
            Chunk::Remove(issues) => pending.removes.extend(issues),
            Chunk::Analogs(issues) => pending.analogs.extend(issues),
        }
    }
}

fn split<T: Clone>(items: &[T], size: usize, wrap: fn(Vec<T>) -> Chunk) -> Vec<Chunk> {
    items.chunks(size.max(1)).map(|c| wrap(c.to_vec())).collect()
}

async fn write_chunk(gateway: &dyn PersistenceGateway, chunk: &Chunk) -> Result<(), GatewayError> {
    match chunk {
        Chunk::Store(issues) => gateway.store_booleans(issues).await,
        Chunk::Remove(issues) => gateway.remove_booleans(issues).await,
        Chunk::Analogs(issues) => gateway.store_analogs(issues).await,
    }
}

/// Accumulates merged updates and persists them in chunks.
pub struct BatchFlusher {
    config: FlusherConfig,
    gateway: Arc<dyn PersistenceGateway>,
    bulkhead: Bulkhead,
    retry: RetryPolicy,
    pending: PendingWrites,
    metrics: Arc<FlushMetrics>,
}

impl BatchFlusher {
    pub fn new(
        config: FlusherConfig,
        gateway: Arc<dyn PersistenceGateway>,
        metrics: Arc<FlushMetrics>,
    ) -> Self {
        let bulkhead = Bulkhead::new("persistence", config.max_parallel_db_operations);
        let retry = RetryPolicy::single_retry(config.retry_backoff);
        Self {
            config,
            gateway,
            bulkhead,
            retry,
            pending: PendingWrites::default(),
            metrics,
        }
    }

    pub fn pending(&self) -> &PendingWrites {
        &self.pending
    }

    pub fn metrics(&self) -> Arc<FlushMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn accept(&mut self, item: FlushItem) {
        match item {
            FlushItem::Boolean { update, handle } => {
                self.pending.add_update(update);
                self.pending.add_handle(handle);
            }
            FlushItem::Analog { issue, handle } => {
                self.pending.add_analog(issue);
                self.pending.add_handle(handle);
            }
            FlushItem::Skipped { handle } => self.pending.add_handle(handle),
        }
    }

    /// Receives until the channel closes, then flushes one last time.
    pub async fn run(mut self, mut receiver: mpsc::Receiver<FlushItem>) -> FlushMetricsSnapshot {
        let mut ticker = tokio::time::interval(self.config.storage_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            storage_period_ms = self.config.storage_period.as_millis() as u64,
            max_items = self.config.max_items_per_db_interaction,
            max_parallel = self.config.max_parallel_db_operations,
            "Batch flusher started"
        );

        loop {
            tokio::select! {
                item = receiver.recv() => match item {
                    Some(item) => {
                        self.accept(item);
                        if self.pending.item_count() >= self.config.min_items_to_perform_db_operations {
                            self.flush().await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush().await,
            }
        }

        self.flush().await;
        if !self.pending.is_empty() {
            warn!(
                items = self.pending.item_count(),
                handles = self.pending.handle_count(),
                "Final flush failed, pending writes left unacknowledged"
            );
        }

        let snapshot = self.metrics.snapshot();
        info!(
            flushes = snapshot.flushes,
            booleans_stored = snapshot.booleans_stored,
            booleans_removed = snapshot.booleans_removed,
            analogs_stored = snapshot.analogs_stored,
            failed_chunks = snapshot.failed_chunks,
            acknowledged = snapshot.acknowledged,
            "Batch flusher shutting down"
        );
        snapshot
    }

    /// Writes everything pending. Failed chunks and, unless the whole flush
    /// succeeded, all handles stay pending for the next flush.
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let start = Instant::now();
        let PendingWrites {
            inserts,
            removes,
            analogs,
            handles,
        } = std::mem::take(&mut self.pending);
        let size = self.config.max_items_per_db_interaction;
        let mut carried = PendingWrites::default();

        let inserts: Vec<BooleanIssue> = inserts.into_iter().collect();
        let failed_inserts = self.run_stage(split(&inserts, size, Chunk::Store)).await;
        let inserts_ok = failed_inserts.is_empty();
        let mut failed = failed_inserts.len();
        for chunk in failed_inserts {
            chunk.carry_into(&mut carried);
        }

        if inserts_ok {
            let removes: Vec<BooleanIssue> = removes.into_iter().collect();
            let failed_removes = self.run_stage(split(&removes, size, Chunk::Remove)).await;
            failed += failed_removes.len();
            for chunk in failed_removes {
                chunk.carry_into(&mut carried);
            }
        } else if !removes.is_empty() {
            debug!(removes = removes.len(), "Deferring removes until inserts succeed");
            carried.removes.extend(removes);
        }

        let failed_analogs = self.run_stage(split(&analogs, size, Chunk::Analogs)).await;
        failed += failed_analogs.len();
        for chunk in failed_analogs {
            chunk.carry_into(&mut carried);
        }

        let succeeded = failed == 0 && carried.item_count() == 0;
        if succeeded {
            self.acknowledge(handles).await;
        } else {
            warn!(
                failed_chunks = failed,
                carried = carried.item_count(),
                handles = handles.len(),
                "Flush incomplete, carrying writes forward"
            );
            carried.handles = handles;
        }

        self.pending.restore(carried);
        self.metrics
            .record_flush(succeeded, start.elapsed().as_nanos() as u64);
    }

    /// Runs the chunks of one stage through the bulkhead and returns the
    /// chunks that still failed after retrying.
    async fn run_stage(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let results = join_all(chunks.into_iter().map(|chunk| self.write(chunk))).await;
        results.into_iter().filter_map(|r| r.err()).collect()
    }

    async fn write(&self, chunk: Chunk) -> Result<(), Chunk> {
        let _permit = match self.bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, chunk = chunk.kind(), "Bulkhead unavailable");
                self.metrics.record_failed_chunk();
                return Err(chunk);
            }
        };

        let gateway = self.gateway.as_ref();
        let metrics = self.metrics.as_ref();
        let pending = &chunk;
        let result = self
            .retry
            .execute(move |attempt| {
                if attempt > 0 {
                    metrics.record_retry();
                }
                write_chunk(gateway, pending)
            })
            .await;

        match result {
            Ok(()) => {
                match &chunk {
                    Chunk::Store(issues) => self.metrics.record_booleans_stored(issues.len()),
                    Chunk::Remove(issues) => self.metrics.record_booleans_removed(issues.len()),
                    Chunk::Analogs(issues) => self.metrics.record_analogs_stored(issues.len()),
                }
                debug!(chunk = chunk.kind(), items = chunk.len(), "Chunk persisted");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, chunk = chunk.kind(), items = chunk.len(), "Chunk failed");
                self.metrics.record_failed_chunk();
                Err(chunk)
            }
        }
    }

    async fn acknowledge(&self, mut handles: Vec<SharedHandle>) {
        handles.sort_by_key(|h| (h.partition(), h.offset()));
        for handle in handles {
            match handle.acknowledge().await {
                Ok(()) => self.metrics.record_acknowledged(),
                Err(e) => {
                    warn!(
                        error = %e,
                        partition = handle.partition(),
                        offset = handle.offset(),
                        "Acknowledge failed"
                    );
                    self.metrics.record_ack_failure();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::OffsetLedger;
    use crate::gateway::{GatewayCall, InMemoryGateway};
    use aceimerge_core::IssueType;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn issue(start: i64) -> BooleanIssue {
        BooleanIssue::synthesize("STA.BHZ", IssueType::ClockLocked, at(start), at(start + 5), true)
            .unwrap()
    }

    fn analog(start: i64) -> AnalogIssue {
        AnalogIssue::synthesize("STA.BHZ", IssueType::MeanAmplitude, at(start), at(start + 1), 42.0)
            .unwrap()
    }

    fn test_config(max_items: usize) -> FlusherConfig {
        FlusherConfig {
            storage_period: Duration::from_millis(20),
            max_items_per_db_interaction: max_items,
            max_parallel_db_operations: 2,
            min_items_to_perform_db_operations: 1,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn flusher(gateway: &Arc<InMemoryGateway>, max_items: usize) -> BatchFlusher {
        BatchFlusher::new(
            test_config(max_items),
            Arc::clone(gateway) as Arc<dyn PersistenceGateway>,
            Arc::new(FlushMetrics::default()),
        )
    }

    fn boolean(update: Update, ledger: &Arc<OffsetLedger>, offset: i64) -> FlushItem {
        FlushItem::Boolean {
            update,
            handle: ledger.handle(0, offset),
        }
    }

    #[test]
    fn test_removal_cancels_pending_insert() {
        let a = issue(0);
        let b = issue(10);
        let mut pending = PendingWrites::default();

        pending.add_update(Update::inserted_only(a.clone()));
        pending.add_update(Update::new(HashSet::from([b.clone()]), HashSet::from([a.clone()])));

        assert_eq!(pending.inserts(), &HashSet::from([b]));
        assert!(pending.removes().is_empty());
        assert_eq!(pending.item_count(), 1);
    }

    #[test]
    fn test_removal_of_stored_issue_is_scheduled() {
        let a = issue(0);
        let mut pending = PendingWrites::default();
        pending.add_update(Update::new(HashSet::new(), HashSet::from([a.clone()])));
        assert_eq!(pending.removes(), &HashSet::from([a]));
        assert!(!pending.is_empty());
    }

    #[tokio::test]
    async fn test_flush_orders_inserts_before_removes() {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = OffsetLedger::new();
        let mut flusher = flusher(&gateway, 100);
        let a = issue(0);
        let b = issue(10);

        flusher.accept(boolean(Update::inserted_only(a.clone()), &ledger, 1));
        flusher.flush().await;
        flusher.accept(boolean(
            Update::new(HashSet::from([b.clone()]), HashSet::from([a.clone()])),
            &ledger,
            2,
        ));
        flusher.flush().await;

        assert_eq!(
            gateway.calls(),
            vec![
                GatewayCall::StoreBooleans(vec![a.id()]),
                GatewayCall::StoreBooleans(vec![b.id()]),
                GatewayCall::RemoveBooleans(vec![a.id()]),
            ]
        );
        assert_eq!(gateway.booleans(), vec![b]);
        assert_eq!(ledger.committed(0), Some(2));
        assert!(flusher.pending().is_empty());
    }

    #[tokio::test]
    async fn test_flush_splits_into_chunks() {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = OffsetLedger::new();
        let mut flusher = flusher(&gateway, 2);

        for i in 0..5 {
            flusher.accept(boolean(Update::inserted_only(issue(i * 10)), &ledger, i));
        }
        flusher.accept(FlushItem::Analog {
            issue: analog(0),
            handle: ledger.handle(0, 5),
        });
        flusher.flush().await;

        let calls = gateway.calls();
        let stores = calls
            .iter()
            .filter(|c| matches!(c, GatewayCall::StoreBooleans(_)))
            .count();
        assert_eq!(stores, 3);
        assert_eq!(gateway.booleans().len(), 5);
        assert_eq!(gateway.analogs().len(), 1);
        assert_eq!(ledger.acknowledged(), 6);

        let snapshot = flusher.metrics().snapshot();
        assert_eq!(snapshot.booleans_stored, 5);
        assert_eq!(snapshot.analogs_stored, 1);
        assert_eq!(snapshot.flushes, 1);
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = OffsetLedger::new();
        let mut flusher = flusher(&gateway, 100);
        gateway.fail_next(1);

        flusher.accept(boolean(Update::inserted_only(issue(0)), &ledger, 1));
        flusher.flush().await;

        assert_eq!(gateway.booleans().len(), 1);
        assert_eq!(gateway.failed_calls(), 1);
        assert_eq!(ledger.acknowledged(), 1);
        let snapshot = flusher.metrics().snapshot();
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.failed_chunks, 0);
    }

    #[tokio::test]
    async fn test_failed_flush_carries_writes_and_handles() {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = OffsetLedger::new();
        let mut flusher = flusher(&gateway, 100);
        let a = issue(0);
        let b = issue(10);

        flusher.accept(boolean(Update::inserted_only(a.clone()), &ledger, 1));
        flusher.flush().await;

        gateway.set_unavailable(true);
        flusher.accept(boolean(
            Update::new(HashSet::from([b.clone()]), HashSet::from([a.clone()])),
            &ledger,
            2,
        ));
        flusher.flush().await;

        assert_eq!(flusher.pending().inserts(), &HashSet::from([b.clone()]));
        assert_eq!(flusher.pending().removes(), &HashSet::from([a.clone()]));
        assert_eq!(flusher.pending().handle_count(), 1);
        assert_eq!(ledger.committed(0), Some(1));
        // Only the insert chunk was attempted, the removal waits for it.
        assert_eq!(gateway.failed_calls(), 2);
        assert_eq!(gateway.booleans(), vec![a]);

        gateway.set_unavailable(false);
        flusher.flush().await;
        assert_eq!(gateway.booleans(), vec![b]);
        assert_eq!(ledger.committed(0), Some(2));
        assert!(flusher.pending().is_empty());

        let snapshot = flusher.metrics().snapshot();
        assert_eq!(snapshot.failed_flushes, 1);
        assert_eq!(snapshot.failed_chunks, 1);
    }

    #[tokio::test]
    async fn test_skipped_records_are_acknowledged() {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = OffsetLedger::new();
        let mut flusher = flusher(&gateway, 100);

        flusher.accept(FlushItem::Skipped {
            handle: ledger.handle(3, 9),
        });
        assert_eq!(flusher.pending().item_count(), 0);
        flusher.flush().await;

        assert!(gateway.calls().is_empty());
        assert_eq!(ledger.committed(3), Some(9));
    }

    #[tokio::test]
    async fn test_run_flushes_on_close() {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = OffsetLedger::new();
        let mut config = test_config(100);
        config.min_items_to_perform_db_operations = 1000;
        config.storage_period = Duration::from_secs(3600);
        let flusher = BatchFlusher::new(
            config,
            Arc::clone(&gateway) as Arc<dyn PersistenceGateway>,
            Arc::new(FlushMetrics::default()),
        );

        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(flusher.run(rx));
        for i in 0..3 {
            tx.send(boolean(Update::inserted_only(issue(i * 10)), &ledger, i))
                .await
                .unwrap();
        }
        drop(tx);

        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.booleans_stored, 3);
        assert_eq!(snapshot.acknowledged, 3);
        assert_eq!(gateway.booleans().len(), 3);
    }
}
