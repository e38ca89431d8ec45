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

//! Persistence gateway consumed by the batch flusher.
//!
//! Every call is all-or-nothing and idempotent by issue id, so the flusher
//! may retry a failed call with the same batch.

use aceimerge_core::{AceiError, AnalogIssue, BooleanIssue};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl From<GatewayError> for AceiError {
    fn from(e: GatewayError) -> Self {
        AceiError::Persistence(e.to_string())
    }
}

/// Durable store for merged issues.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn store_booleans(&self, issues: &[BooleanIssue]) -> Result<(), GatewayError>;

    async fn remove_booleans(&self, issues: &[BooleanIssue]) -> Result<(), GatewayError>;

    async fn store_analogs(&self, issues: &[AnalogIssue]) -> Result<(), GatewayError>;

    /// Channels the processor should accept. `None` accepts every channel.
    async fn known_channels(&self) -> Result<Option<HashSet<String>>, GatewayError> {
        Ok(None)
    }
}

/// One successful gateway call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    StoreBooleans(Vec<Uuid>),
    RemoveBooleans(Vec<Uuid>),
    StoreAnalogs(Vec<Uuid>),
}

/// In-memory gateway, with fault injection for exercising retries.
#[derive(Default)]
pub struct InMemoryGateway {
    booleans: DashMap<Uuid, BooleanIssue>,
    analogs: DashMap<Uuid, AnalogIssue>,
    calls: Mutex<Vec<GatewayCall>>,
    failed_calls: AtomicUsize,
    fail_next: AtomicUsize,
    unavailable: AtomicBool,
    known_channels: Option<HashSet<String>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_channels: Some(channels.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Fails the next `count` calls.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fails every call until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Live boolean issues, sorted by start time.
    pub fn booleans(&self) -> Vec<BooleanIssue> {
        let mut issues: Vec<BooleanIssue> = self.booleans.iter().map(|e| e.value().clone()).collect();
        issues.sort_by_key(|i| (i.channel_name().to_string(), i.issue_type(), i.start_time()));
        issues
    }

    pub fn analogs(&self) -> Vec<AnalogIssue> {
        let mut issues: Vec<AnalogIssue> = self.analogs.iter().map(|e| e.value().clone()).collect();
        issues.sort_by_key(|i| (i.channel_name().to_string(), i.issue_type(), i.start_time()));
        issues
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn failed_calls(&self) -> usize {
        self.failed_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.unavailable.load(Ordering::SeqCst) {
            self.failed_calls.fetch_add(1, Ordering::SeqCst);
            return Err(GatewayError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn store_booleans(&self, issues: &[BooleanIssue]) -> Result<(), GatewayError> {
        self.check_available()?;
        for issue in issues {
            self.booleans.insert(issue.id(), issue.clone());
        }
        self.calls
            .lock()
            .push(GatewayCall::StoreBooleans(issues.iter().map(|i| i.id()).collect()));
        Ok(())
    }

    async fn remove_booleans(&self, issues: &[BooleanIssue]) -> Result<(), GatewayError> {
        self.check_available()?;
        for issue in issues {
            self.booleans.remove(&issue.id());
        }
        self.calls
            .lock()
            .push(GatewayCall::RemoveBooleans(issues.iter().map(|i| i.id()).collect()));
        Ok(())
    }

    async fn store_analogs(&self, issues: &[AnalogIssue]) -> Result<(), GatewayError> {
        self.check_available()?;
        for issue in issues {
            self.analogs.insert(issue.id(), issue.clone());
        }
        self.calls
            .lock()
            .push(GatewayCall::StoreAnalogs(issues.iter().map(|i| i.id()).collect()));
        Ok(())
    }

    async fn known_channels(&self) -> Result<Option<HashSet<String>>, GatewayError> {
        Ok(self.known_channels.clone())
    }
}
