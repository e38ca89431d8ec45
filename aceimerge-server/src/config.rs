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

use aceimerge_core::MergeSettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// ACEI Merge Processor Configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    /// Maximum gap between same-status issues that still fuses them (required)
    #[serde(default)]
    pub merge_tolerance_ms: Option<u64>,

    /// Flush timer interval
    #[serde(default = "default_storage_period_ms")]
    pub storage_period_ms: u64,

    /// Maximum issues per persistence call
    #[serde(default = "default_max_items_per_db_interaction")]
    pub max_items_per_db_interaction: usize,

    /// Maximum persistence calls in flight
    #[serde(default = "default_max_parallel_db_operations")]
    pub max_parallel_db_operations: usize,

    /// Pending issue count that triggers a flush before the timer fires
    #[serde(default = "default_min_items_to_perform_db_operations")]
    pub min_items_to_perform_db_operations: usize,

    /// Merge workers (0 = available parallelism)
    #[serde(default)]
    pub processor_thread_count: usize,

    /// Delay before retrying a failed persistence call
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Age after which timeline entries are evicted from memory
    #[serde(default = "default_cache_expiration_period_seconds")]
    pub cache_expiration_period_seconds: u64,

    /// Interval between merge/flush statistics log lines
    #[serde(default = "default_benchmark_logging_period_seconds")]
    pub benchmark_logging_period_seconds: u64,

    /// Capacity of the queue between merge workers and the flusher (backpressure)
    #[serde(default = "default_flush_queue_capacity")]
    pub flush_queue_capacity: usize,

    /// Capacity of each merge worker's queue
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,

    /// Store untouched issues verbatim instead of as fresh-id copies
    #[serde(default = "default_keep_ids")]
    pub keep_ids: bool,

    /// Channels accepted by the processor (None = accept all, or ask the gateway)
    #[serde(default)]
    pub known_channels: Option<Vec<String>>,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,
}

// Default values
fn default_storage_period_ms() -> u64 {
    1000
}

fn default_max_items_per_db_interaction() -> usize {
    1000
}

fn default_max_parallel_db_operations() -> usize {
    4
}

fn default_min_items_to_perform_db_operations() -> usize {
    100
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_cache_expiration_period_seconds() -> u64 {
    3600
}

fn default_benchmark_logging_period_seconds() -> u64 {
    60
}

fn default_flush_queue_capacity() -> usize {
    10_000
}

fn default_worker_queue_capacity() -> usize {
    1024
}

fn default_keep_ids() -> bool {
    true
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            merge_tolerance_ms: None,
            storage_period_ms: default_storage_period_ms(),
            max_items_per_db_interaction: default_max_items_per_db_interaction(),
            max_parallel_db_operations: default_max_parallel_db_operations(),
            min_items_to_perform_db_operations: default_min_items_to_perform_db_operations(),
            processor_thread_count: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            cache_expiration_period_seconds: default_cache_expiration_period_seconds(),
            benchmark_logging_period_seconds: default_benchmark_logging_period_seconds(),
            flush_queue_capacity: default_flush_queue_capacity(),
            worker_queue_capacity: default_worker_queue_capacity(),
            keep_ids: default_keep_ids(),
            known_channels: None,
            json_logs: false,
        }
    }
}

/// Overrides `target` when the variable is set; unparsable values are logged and ignored.
fn env_override<T: FromStr>(name: &str, target: &mut T) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => {
                *target = value;
                true
            }
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring unparsable environment override");
                false
            }
        },
        Err(_) => false,
    }
}

impl ProcessorConfig {
    /// Configuration with the given merge tolerance and defaults elsewhere
    pub fn with_tolerance(merge_tolerance_ms: u64) -> Self {
        Self {
            merge_tolerance_ms: Some(merge_tolerance_ms),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - ACEI_MERGE_TOLERANCE_MS
    /// - ACEI_STORAGE_PERIOD_MS
    /// - ACEI_MAX_ITEMS_PER_DB_INTERACTION
    /// - ACEI_MAX_PARALLEL_DB_OPERATIONS
    /// - ACEI_MIN_ITEMS_TO_PERFORM_DB_OPERATIONS
    /// - ACEI_PROCESSOR_THREAD_COUNT
    /// - ACEI_RETRY_BACKOFF_MS
    /// - ACEI_CACHE_EXPIRATION_PERIOD_SECONDS
    /// - ACEI_BENCHMARK_LOGGING_PERIOD_SECONDS
    /// - ACEI_FLUSH_QUEUE_CAPACITY
    /// - ACEI_WORKER_QUEUE_CAPACITY
    /// - ACEI_KEEP_IDS
    /// - ACEI_JSON_LOGS
    pub fn from_env() -> Self {
        Self::merge_with_env(Self::default())
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Ok(Self::merge_with_env(config))
    }

    /// Merge config with environment variables (env takes priority)
    fn merge_with_env(mut config: Self) -> Self {
        let mut tolerance = config.merge_tolerance_ms.unwrap_or_default();
        if env_override("ACEI_MERGE_TOLERANCE_MS", &mut tolerance) {
            config.merge_tolerance_ms = Some(tolerance);
        }
        env_override("ACEI_STORAGE_PERIOD_MS", &mut config.storage_period_ms);
        env_override(
            "ACEI_MAX_ITEMS_PER_DB_INTERACTION",
            &mut config.max_items_per_db_interaction,
        );
        env_override(
            "ACEI_MAX_PARALLEL_DB_OPERATIONS",
            &mut config.max_parallel_db_operations,
        );
        env_override(
            "ACEI_MIN_ITEMS_TO_PERFORM_DB_OPERATIONS",
            &mut config.min_items_to_perform_db_operations,
        );
        env_override("ACEI_PROCESSOR_THREAD_COUNT", &mut config.processor_thread_count);
        env_override("ACEI_RETRY_BACKOFF_MS", &mut config.retry_backoff_ms);
        env_override(
            "ACEI_CACHE_EXPIRATION_PERIOD_SECONDS",
            &mut config.cache_expiration_period_seconds,
        );
        env_override(
            "ACEI_BENCHMARK_LOGGING_PERIOD_SECONDS",
            &mut config.benchmark_logging_period_seconds,
        );
        env_override("ACEI_FLUSH_QUEUE_CAPACITY", &mut config.flush_queue_capacity);
        env_override("ACEI_WORKER_QUEUE_CAPACITY", &mut config.worker_queue_capacity);
        env_override("ACEI_KEEP_IDS", &mut config.keep_ids);
        env_override("ACEI_JSON_LOGS", &mut config.json_logs);
        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.merge_tolerance_ms.is_none() {
            anyhow::bail!("merge_tolerance_ms is required");
        }
        if self.storage_period_ms == 0 {
            anyhow::bail!("storage_period_ms must be positive");
        }
        if self.max_items_per_db_interaction == 0 {
            anyhow::bail!("max_items_per_db_interaction must be positive");
        }
        if self.max_parallel_db_operations == 0 {
            anyhow::bail!("max_parallel_db_operations must be positive");
        }
        if self.min_items_to_perform_db_operations == 0 {
            anyhow::bail!("min_items_to_perform_db_operations must be positive");
        }
        if self.cache_expiration_period_seconds == 0 || self.benchmark_logging_period_seconds == 0
        {
            anyhow::bail!("maintenance periods must be positive");
        }
        if self.flush_queue_capacity == 0 || self.worker_queue_capacity == 0 {
            anyhow::bail!("queue capacities must be positive");
        }
        Ok(())
    }

    /// Merge settings handed to every timeline
    pub fn merge_settings(&self) -> Result<MergeSettings> {
        let tolerance = self
            .merge_tolerance_ms
            .ok_or_else(|| anyhow::anyhow!("merge_tolerance_ms is required"))?;
        Ok(MergeSettings::new(tolerance).with_keep_ids(self.keep_ids))
    }

    /// Number of merge workers to spawn
    pub fn worker_count(&self) -> usize {
        if self.processor_thread_count > 0 {
            self.processor_thread_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn storage_period(&self) -> Duration {
        Duration::from_millis(self.storage_period_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cache_expiration(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_period_seconds)
    }

    pub fn benchmark_logging_period(&self) -> Duration {
        Duration::from_secs(self.benchmark_logging_period_seconds)
    }

    pub fn known_channel_set(&self) -> Option<HashSet<String>> {
        self.known_channels
            .as_ref()
            .map(|channels| channels.iter().cloned().collect())
    }
}
