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

use thiserror::Error;

/// Errors raised by the merge engine and the ingestion pipeline.
#[derive(Debug, Error)]
pub enum AceiError {
    /// Caller handed in a record that cannot be applied (wrong key, empty span).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A timeline ended up with overlapping entries. Never recoverable.
    #[error("Timeline invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, AceiError>;
