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

//! Ingestion pipeline
//!
//! ```text
//! booleans ─▶ router ─┬─▶ worker 0 ─┐
//!                     ├─▶ worker 1 ─┼─▶ flush queue ─▶ BatchFlusher
//!                     └─▶ worker N ─┤
//! analogs ──▶ forwarder ────────────┘
//! ```
//!
//! The router pins each channel to one worker the first time it sees it, so
//! every key is merged and forwarded in arrival order. Workers block on the
//! bounded flush queue, which is how a slow gateway pushes back on intake.

use crate::batcher::FlushItem;
use crate::delivery::Delivery;
use crate::metrics::IngestionMetrics;
use aceimerge_core::{AceiError, AnalogIssue, BooleanIssue, Result};
use aceimerge_storage::StoreRegistry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drops records from channels outside the known set, warning once per channel.
struct ChannelFilter {
    known: Option<Arc<HashSet<String>>>,
    warned: HashSet<String>,
}

impl ChannelFilter {
    fn new(known: Option<Arc<HashSet<String>>>) -> Self {
        Self {
            known,
            warned: HashSet::new(),
        }
    }

    fn accepts(&mut self, channel_name: &str) -> bool {
        let Some(known) = &self.known else {
            return true;
        };
        if known.contains(channel_name) {
            return true;
        }
        if self.warned.insert(channel_name.to_string()) {
            warn!(channel = channel_name, "Dropping issues for unknown channel");
        }
        false
    }
}

pub struct IngestionPipeline {
    registry: Arc<StoreRegistry>,
    metrics: Arc<IngestionMetrics>,
    cancel: CancellationToken,
    known_channels: Option<Arc<HashSet<String>>>,
    worker_count: usize,
    worker_queue_capacity: usize,
}

impl IngestionPipeline {
    pub fn new(
        registry: Arc<StoreRegistry>,
        metrics: Arc<IngestionMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            metrics,
            cancel,
            known_channels: None,
            worker_count: 1,
            worker_queue_capacity: 1024,
        }
    }

    /// Only accept records from these channels.
    pub fn with_known_channels(mut self, channels: Option<HashSet<String>>) -> Self {
        self.known_channels = channels.map(Arc::new);
        self
    }

    pub fn with_workers(mut self, count: usize, queue_capacity: usize) -> Self {
        self.worker_count = count.max(1);
        self.worker_queue_capacity = queue_capacity.max(1);
        self
    }

    /// Spawns the router, merge workers and analog forwarder.
    ///
    /// Every task holds a clone of `flush_tx`; the flusher sees its channel
    /// close once all of them have finished.
    pub fn spawn(
        self,
        boolean_rx: mpsc::Receiver<Delivery<BooleanIssue>>,
        analog_rx: mpsc::Receiver<Delivery<AnalogIssue>>,
        flush_tx: mpsc::Sender<FlushItem>,
    ) -> PipelineHandle {
        let mut tasks = Vec::with_capacity(self.worker_count + 2);
        let mut worker_txs = Vec::with_capacity(self.worker_count);

        for worker_id in 0..self.worker_count {
            let (tx, rx) = mpsc::channel(self.worker_queue_capacity);
            worker_txs.push(tx);
            tasks.push(tokio::spawn(merge_worker(
                worker_id,
                rx,
                Arc::clone(&self.registry),
                flush_tx.clone(),
                Arc::clone(&self.metrics),
                self.cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(route_booleans(
            boolean_rx,
            worker_txs,
            ChannelFilter::new(self.known_channels.clone()),
            flush_tx.clone(),
            Arc::clone(&self.metrics),
            self.cancel.clone(),
        )));

        tasks.push(tokio::spawn(forward_analogs(
            analog_rx,
            ChannelFilter::new(self.known_channels),
            flush_tx,
            Arc::clone(&self.metrics),
            self.cancel,
        )));

        info!(workers = self.worker_count, "Ingestion pipeline started");
        PipelineHandle { tasks }
    }
}

/// Tasks spawned by [`IngestionPipeline::spawn`].
pub struct PipelineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Waits for every pipeline task to finish.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            task.await.map_err(|e| AceiError::Task(e.to_string()))?;
        }
        Ok(())
    }
}

async fn route_booleans(
    mut rx: mpsc::Receiver<Delivery<BooleanIssue>>,
    workers: Vec<mpsc::Sender<Delivery<BooleanIssue>>>,
    mut filter: ChannelFilter,
    flush_tx: mpsc::Sender<FlushItem>,
    metrics: Arc<IngestionMetrics>,
    cancel: CancellationToken,
) {
    let mut assignments: HashMap<String, usize> = HashMap::new();
    let mut next_worker = 0usize;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = rx.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };
        metrics.record_boolean_received();

        if !filter.accepts(delivery.issue.channel_name()) {
            metrics.record_unknown_channel();
            if flush_tx
                .send(FlushItem::Skipped {
                    handle: delivery.handle,
                })
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        let index = match assignments.get(delivery.issue.channel_name()) {
            Some(index) => *index,
            None => {
                let index = next_worker % workers.len();
                next_worker += 1;
                assignments.insert(delivery.issue.channel_name().to_string(), index);
                index
            }
        };

        if workers[index].send(delivery).await.is_err() {
            warn!(worker = index, "Merge worker stopped, boolean router exiting");
            break;
        }
    }

    debug!(channels = assignments.len(), "Boolean router stopped");
}

async fn merge_worker(
    worker_id: usize,
    mut rx: mpsc::Receiver<Delivery<BooleanIssue>>,
    registry: Arc<StoreRegistry>,
    flush_tx: mpsc::Sender<FlushItem>,
    metrics: Arc<IngestionMetrics>,
    cancel: CancellationToken,
) {
    while let Some(Delivery { issue, handle }) = rx.recv().await {
        let channel = issue.channel_name().to_string();
        let issue_type = issue.issue_type();

        let item = match registry.put(issue) {
            Ok(update) => {
                metrics.record_update(update.is_empty());
                if !update.is_empty() {
                    debug!(
                        worker = worker_id,
                        channel = %channel,
                        issue_type = %issue_type,
                        inserted = update.inserted().len(),
                        removed = update.removed().len(),
                        "Merged issue"
                    );
                }
                FlushItem::Boolean { update, handle }
            }
            Err(AceiError::InvariantViolation(message)) => {
                error!(
                    worker = worker_id,
                    channel = %channel,
                    issue_type = %issue_type,
                    error = %message,
                    "Timeline invariant violated, stopping processor"
                );
                metrics.record_fatal(message);
                cancel.cancel();
                break;
            }
            Err(e) => {
                error!(
                    worker = worker_id,
                    channel = %channel,
                    issue_type = %issue_type,
                    error = %e,
                    "Dropping invalid issue"
                );
                metrics.record_invalid();
                FlushItem::Skipped { handle }
            }
        };

        if flush_tx.send(item).await.is_err() {
            warn!(worker = worker_id, "Flush queue closed, merge worker exiting");
            break;
        }
    }

    debug!(worker = worker_id, "Merge worker stopped");
}

async fn forward_analogs(
    mut rx: mpsc::Receiver<Delivery<AnalogIssue>>,
    mut filter: ChannelFilter,
    flush_tx: mpsc::Sender<FlushItem>,
    metrics: Arc<IngestionMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let Delivery { issue, handle } = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = rx.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };
        metrics.record_analog_received();

        let item = if filter.accepts(issue.channel_name()) {
            FlushItem::Analog { issue, handle }
        } else {
            metrics.record_unknown_channel();
            FlushItem::Skipped { handle }
        };

        if flush_tx.send(item).await.is_err() {
            warn!("Flush queue closed, analog forwarder exiting");
            break;
        }
    }

    debug!("Analog forwarder stopped");
}
