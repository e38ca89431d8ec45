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

//! Resilience primitives for persistence calls (retry policy + bulkhead).

use rand::random;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    /// One retry after a fixed `backoff`. This is what the flusher uses.
    pub fn single_retry(backoff: Duration) -> Self {
        Self {
            max_attempts: 2,
            initial_delay: backoff,
            max_delay: backoff,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base * jitter_factor;
        let clamped = jittered.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(clamped)
    }

    /// Runs `operation` until it succeeds or `max_attempts` is reached.
    ///
    /// The closure receives the zero-based attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.delay_for_attempt(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Operation failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(ResilienceError::Exhausted {
            attempts,
            last_error,
        })
    }
}

#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("All {attempts} retry attempts exhausted. Last error: {last_error:?}")]
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    #[error("Bulkhead {0} closed")]
    BulkheadClosed(String),
}

/// Bulkhead isolation for persistence calls.
///
/// Unlike a rejecting bulkhead, callers wait for a free slot.
#[derive(Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    name: String,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            name: name.into(),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ResilienceError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ResilienceError::BulkheadClosed(self.name.clone()))
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
