// Copyright 2025 Taskweave (https://github.com/taskweave)
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

//! Error types for taskweave-core.
//!
//! Most failure categories in reconstruction are soft: skipped records,
//! ambiguous parents and infeasible budgets surface as diagnostics on the
//! result, not as `Err`. Only invariant violations abort a batch.

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Hard errors in the core engines.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The conversation source failed wholesale (not a per-record skip).
    #[error("conversation source error for task {task_id}: {reason}")]
    Source { task_id: String, reason: String },

    /// A reconstructed edge violated temporal precedence or acyclicity.
    /// Indicates corrupted upstream data; aborts the affected batch only.
    #[error("invariant violation in batch: {detail}")]
    InvariantViolation { detail: String },

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
