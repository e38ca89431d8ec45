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

//! Processor metrics
//!
//! Atomic counters for ingestion and flushing, with plain snapshots for
//! logging and for the stats returned at shutdown.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the batch flusher.
#[derive(Debug)]
pub struct FlushMetrics {
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    booleans_stored: AtomicU64,
    booleans_removed: AtomicU64,
    analogs_stored: AtomicU64,
    failed_chunks: AtomicU64,
    retries: AtomicU64,
    acknowledged: AtomicU64,
    ack_failures: AtomicU64,
    total_flush_ns: AtomicU64,
    started: Instant,
}

impl Default for FlushMetrics {
    fn default() -> Self {
        Self {
            flushes: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            booleans_stored: AtomicU64::new(0),
            booleans_removed: AtomicU64::new(0),
            analogs_stored: AtomicU64::new(0),
            failed_chunks: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            ack_failures: AtomicU64::new(0),
            total_flush_ns: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl FlushMetrics {
    #[inline]
    pub fn record_flush(&self, succeeded: bool, elapsed_ns: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        }
        self.total_flush_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_booleans_stored(&self, count: usize) {
        self.booleans_stored.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_booleans_removed(&self, count: usize) {
        self.booleans_removed.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analogs_stored(&self, count: usize) {
        self.analogs_stored.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed_chunk(&self) {
        self.failed_chunks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FlushMetricsSnapshot {
        let flushes = self.flushes.load(Ordering::Relaxed);
        let booleans_stored = self.booleans_stored.load(Ordering::Relaxed);
        let booleans_removed = self.booleans_removed.load(Ordering::Relaxed);
        let analogs_stored = self.analogs_stored.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        let total_flush_ns = self.total_flush_ns.load(Ordering::Relaxed);

        FlushMetricsSnapshot {
            flushes,
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            booleans_stored,
            booleans_removed,
            analogs_stored,
            failed_chunks: self.failed_chunks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            avg_flush_ms: if flushes > 0 {
                (total_flush_ns as f64 / flushes as f64) / 1_000_000.0
            } else {
                0.0
            },
            writes_per_sec: if elapsed > 0.0 {
                (booleans_stored + booleans_removed + analogs_stored) as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushMetricsSnapshot {
    pub flushes: u64,
    pub failed_flushes: u64,
    pub booleans_stored: u64,
    pub booleans_removed: u64,
    pub analogs_stored: u64,
    pub failed_chunks: u64,
    pub retries: u64,
    pub acknowledged: u64,
    pub ack_failures: u64,
    pub avg_flush_ms: f64,
    pub writes_per_sec: f64,
}

/// Counters updated by the ingestion pipeline.
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    booleans_received: AtomicU64,
    analogs_received: AtomicU64,
    updates_forwarded: AtomicU64,
    empty_updates: AtomicU64,
    dropped_unknown_channel: AtomicU64,
    dropped_invalid: AtomicU64,
    fatal_error: Mutex<Option<String>>,
}

impl IngestionMetrics {
    #[inline]
    pub fn record_boolean_received(&self) {
        self.booleans_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_analog_received(&self) {
        self.analogs_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_update(&self, empty: bool) {
        self.updates_forwarded.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_unknown_channel(&self) {
        self.dropped_unknown_channel.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid(&self) {
        self.dropped_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Keeps the first fatal error only.
    pub fn record_fatal(&self, error: String) {
        let mut fatal = self.fatal_error.lock();
        if fatal.is_none() {
            *fatal = Some(error);
        }
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.fatal_error.lock().clone()
    }

    pub fn snapshot(&self) -> IngestionStats {
        IngestionStats {
            booleans_received: self.booleans_received.load(Ordering::Relaxed),
            analogs_received: self.analogs_received.load(Ordering::Relaxed),
            updates_forwarded: self.updates_forwarded.load(Ordering::Relaxed),
            empty_updates: self.empty_updates.load(Ordering::Relaxed),
            dropped_unknown_channel: self.dropped_unknown_channel.load(Ordering::Relaxed),
            dropped_invalid: self.dropped_invalid.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestionStats {
    pub booleans_received: u64,
    pub analogs_received: u64,
    pub updates_forwarded: u64,
    pub empty_updates: u64,
    pub dropped_unknown_channel: u64,
    pub dropped_invalid: u64,
}
