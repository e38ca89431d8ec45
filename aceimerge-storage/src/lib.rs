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

//! Aceimerge Storage Layer
//!
//! In-memory interval timelines for boolean environment issues.
//!
//! ## Architecture
//!
//! - **BooleanRangeMap**: ordered, non-overlapping timeline for one
//!   (channel, issue type), with the put/merge algorithm
//! - **StoreRegistry**: concurrent key to timeline map with per-key locking
//! - **PutStats**: merge statistics reported by the timelines
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aceimerge_core::{BooleanIssue, IssueType, MergeSettings};
//! use aceimerge_storage::StoreRegistry;
//!
//! let registry = StoreRegistry::new(MergeSettings::new(500));
//! let update = registry.put(issue)?;
//! ```

pub mod put_stats;
pub mod range_map;
pub mod registry;

pub use put_stats::PutStats;
pub use range_map::BooleanRangeMap;
pub use registry::{SharedRangeMap, StoreRegistry};
