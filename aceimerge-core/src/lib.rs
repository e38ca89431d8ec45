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

//! Aceimerge Core
//!
//! Data model shared by the merge engine and the ingestion pipeline:
//! environment issues, timeline updates, merge settings and the resilience
//! primitives used around persistence.

pub mod config;
pub mod error;
pub mod issue;
pub mod resilience;
pub mod update;

pub use config::MergeSettings;
pub use error::{AceiError, Result};
pub use issue::{AnalogIssue, BooleanIssue, ChannelKey, IssueType};
pub use resilience::{Bulkhead, ResilienceError, RetryPolicy};
pub use update::Update;
