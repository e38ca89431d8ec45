// Copyright 2025 AgentReplay (https://github.com/agentreplay)
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

pub mod batcher;
pub mod config;
pub mod delivery;
pub mod gateway;
pub mod ingestion;
pub mod metrics;

pub use batcher::{BatchFlusher, FlushItem, FlusherConfig, PendingWrites};
pub use config::ProcessorConfig;
pub use delivery::{Delivery, DeliveryHandle, OffsetLedger, SharedHandle};
pub use gateway::{GatewayCall, GatewayError, InMemoryGateway, PersistenceGateway};
pub use ingestion::{IngestionPipeline, PipelineHandle};
pub use metrics::{FlushMetrics, FlushMetricsSnapshot, IngestionMetrics, IngestionStats};

use aceimerge_core::{AceiError, AnalogIssue, BooleanIssue, Result};
use aceimerge_storage::StoreRegistry;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "aceimerge_server=info,aceimerge_storage=info,aceimerge_core=info";

/// Installs the global tracing subscriber, emitting JSON lines when
/// `config.json_logs` is set. `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &ProcessorConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    );

    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Counters reported by [`AceiMergeProcessor::stats`] and at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub ingestion: IngestionStats,
    pub flush: FlushMetricsSnapshot,
    /// Keys with a timeline.
    pub keys: usize,
    /// Issues held across all timelines.
    pub live_entries: usize,
}

/// A running merge processor: ingestion pipeline, batch flusher and
/// maintenance task sharing one store registry.
pub struct AceiMergeProcessor {
    registry: Arc<StoreRegistry>,
    ingestion_metrics: Arc<IngestionMetrics>,
    flush_metrics: Arc<FlushMetrics>,
    cancel: CancellationToken,
    pipeline: PipelineHandle,
    flusher: JoinHandle<FlushMetricsSnapshot>,
    maintenance: JoinHandle<()>,
}

impl AceiMergeProcessor {
    /// Validates `config` and spawns every processor task.
    ///
    /// Known channels come from the config when set, otherwise from the gateway.
    pub async fn start(
        config: ProcessorConfig,
        gateway: Arc<dyn PersistenceGateway>,
        boolean_rx: mpsc::Receiver<Delivery<BooleanIssue>>,
        analog_rx: mpsc::Receiver<Delivery<AnalogIssue>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| AceiError::Config(e.to_string()))?;
        let settings = config
            .merge_settings()
            .map_err(|e| AceiError::Config(e.to_string()))?;

        let known_channels = match config.known_channel_set() {
            Some(channels) => Some(channels),
            None => gateway.known_channels().await?,
        };

        info!(
            merge_tolerance_ms = settings.merge_tolerance_ms,
            keep_ids = settings.keep_ids,
            workers = config.worker_count(),
            known_channels = ?known_channels.as_ref().map(|c| c.len()),
            "Starting ACEI merge processor"
        );

        let registry = Arc::new(StoreRegistry::new(settings));
        let ingestion_metrics = Arc::new(IngestionMetrics::default());
        let flush_metrics = Arc::new(FlushMetrics::default());
        let cancel = CancellationToken::new();

        let (flush_tx, flush_rx) = mpsc::channel(config.flush_queue_capacity);
        let flusher = BatchFlusher::new(
            FlusherConfig::from(&config),
            gateway,
            Arc::clone(&flush_metrics),
        );
        let flusher = tokio::spawn(flusher.run(flush_rx));

        let pipeline = IngestionPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&ingestion_metrics),
            cancel.clone(),
        )
        .with_known_channels(known_channels)
        .with_workers(config.worker_count(), config.worker_queue_capacity)
        .spawn(boolean_rx, analog_rx, flush_tx);

        let maintenance = tokio::spawn(run_maintenance(
            Arc::clone(&registry),
            Arc::clone(&flush_metrics),
            config.cache_expiration(),
            config.benchmark_logging_period(),
            cancel.clone(),
        ));

        Ok(Self {
            registry,
            ingestion_metrics,
            flush_metrics,
            cancel,
            pipeline,
            flusher,
            maintenance,
        })
    }

    pub fn registry(&self) -> Arc<StoreRegistry> {
        Arc::clone(&self.registry)
    }

    /// Cancelling the token stops intake, same as [`Self::shutdown`] without waiting.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            ingestion: self.ingestion_metrics.snapshot(),
            flush: self.flush_metrics.snapshot(),
            keys: self.registry.len(),
            live_entries: self.registry.total_entries(),
        }
    }

    /// Stops intake, drains the merge workers and waits for the final flush.
    pub async fn shutdown(self) -> Result<ProcessorStats> {
        info!("Shutting down ACEI merge processor");
        self.cancel.cancel();
        self.join().await
    }

    /// Waits until both sources close (or intake is cancelled) and the
    /// final flush has run.
    ///
    /// Returns the invariant violation that stopped the processor, if any.
    pub async fn join(self) -> Result<ProcessorStats> {
        let pipeline = self.pipeline.join().await;
        let flush = self.flusher.await;
        self.cancel.cancel();
        let maintenance = self.maintenance.await;

        pipeline?;
        let flush = flush.map_err(|e| AceiError::Task(e.to_string()))?;
        maintenance.map_err(|e| AceiError::Task(e.to_string()))?;

        if let Some(violation) = self.ingestion_metrics.fatal_error() {
            return Err(AceiError::InvariantViolation(violation));
        }

        let stats = ProcessorStats {
            ingestion: self.ingestion_metrics.snapshot(),
            flush,
            keys: self.registry.len(),
            live_entries: self.registry.total_entries(),
        };
        info!(
            keys = stats.keys,
            live_entries = stats.live_entries,
            received = stats.ingestion.booleans_received + stats.ingestion.analogs_received,
            acknowledged = stats.flush.acknowledged,
            "ACEI merge processor stopped"
        );
        Ok(stats)
    }
}

/// Periodic retention sweep and statistics logging.
async fn run_maintenance(
    registry: Arc<StoreRegistry>,
    flush_metrics: Arc<FlushMetrics>,
    expiration: Duration,
    benchmark_period: Duration,
    cancel: CancellationToken,
) {
    let mut retention = tokio::time::interval(expiration);
    retention.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retention.tick().await;
    let mut benchmark = tokio::time::interval(benchmark_period);
    benchmark.set_missed_tick_behavior(MissedTickBehavior::Delay);
    benchmark.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = retention.tick() => {
                let cutoff = chrono::Duration::from_std(expiration)
                    .ok()
                    .and_then(|age| Utc::now().checked_sub_signed(age));
                match cutoff {
                    Some(cutoff) => {
                        let dropped = registry.clear_before(cutoff);
                        debug!(dropped, cutoff = %cutoff, "Retention sweep");
                    }
                    None => warn!(
                        expiration_secs = expiration.as_secs(),
                        "Cache expiration out of range, skipping retention"
                    ),
                }
            }
            _ = benchmark.tick() => {
                let puts = registry.take_put_stats();
                info!(
                    conflicts = puts.conflicts,
                    merges = puts.merges,
                    min_gap_ms = ?puts.min_gap_ms,
                    mean_gap_ms = ?puts.mean_gap_ms(),
                    max_gap_ms = ?puts.max_gap_ms,
                    keys = registry.len(),
                    "Merge statistics"
                );
                let flush = flush_metrics.snapshot();
                info!(
                    flushes = flush.flushes,
                    failed_flushes = flush.failed_flushes,
                    booleans_stored = flush.booleans_stored,
                    booleans_removed = flush.booleans_removed,
                    analogs_stored = flush.analogs_stored,
                    retries = flush.retries,
                    acknowledged = flush.acknowledged,
                    avg_flush_ms = flush.avg_flush_ms,
                    "Flush statistics"
                );
            }
        }
    }

    debug!("Maintenance task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_installs_subscriber_once() {
        let config = ProcessorConfig {
            json_logs: true,
            ..ProcessorConfig::with_tolerance(500)
        };
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_err());
    }

    #[tokio::test]
    async fn test_start_rejects_missing_tolerance() {
        let (_btx, brx) = mpsc::channel(1);
        let (_atx, arx) = mpsc::channel(1);
        let result = AceiMergeProcessor::start(
            ProcessorConfig::default(),
            Arc::new(InMemoryGateway::new()),
            brx,
            arx,
        )
        .await;
        assert!(matches!(result, Err(AceiError::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_with_no_traffic() {
        let (_btx, brx) = mpsc::channel(1);
        let (_atx, arx) = mpsc::channel(1);
        let processor = AceiMergeProcessor::start(
            ProcessorConfig::with_tolerance(500),
            Arc::new(InMemoryGateway::new()),
            brx,
            arx,
        )
        .await
        .unwrap();

        let stats = processor.shutdown().await.unwrap();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.flush.flushes, 0);
    }
}
