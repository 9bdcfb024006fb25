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

//! Configuration for reconstruction and truncation behavior.
//!
//! The prefix window, match threshold and decay constant were tuned against
//! the fixture corpus; they are configuration rather than hard-coded
//! constants so deployments can re-tune without a rebuild.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Default number of leading characters compared when matching an extracted
/// instruction against a child's first message.
pub const DEFAULT_PREFIX_WINDOW: usize = 50;

/// Default minimum normalized-character overlap for a parent assignment.
pub const DEFAULT_MIN_MATCH_LEN: usize = 10;

/// Default decay constant for the truncation weight gradient.
pub const DEFAULT_DECAY_K: f64 = 1.2;

/// Default per-task floor allocation in bytes (enough for a marker).
pub const DEFAULT_FLOOR_BYTES: usize = 64;

/// Tunables for the hierarchy reconstruction engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Number of leading characters of the child's first message compared
    /// against candidate instructions.
    #[serde(default = "default_prefix_window")]
    pub prefix_window: usize,

    /// Minimum match length (normalized characters) below which a candidate
    /// is not considered a parent at all.
    #[serde(default = "default_min_match_len")]
    pub min_match_len: usize,
}

fn default_prefix_window() -> usize {
    DEFAULT_PREFIX_WINDOW
}

fn default_min_match_len() -> usize {
    DEFAULT_MIN_MATCH_LEN
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            prefix_window: default_prefix_window(),
            min_match_len: default_min_match_len(),
        }
    }
}

impl ReconstructionConfig {
    /// Validate that the threshold fits inside the window.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prefix_window == 0 {
            return Err(CoreError::InvalidConfig(
                "prefix_window must be non-zero".to_string(),
            ));
        }
        if self.min_match_len > self.prefix_window {
            return Err(CoreError::InvalidConfig(format!(
                "min_match_len ({}) exceeds prefix_window ({})",
                self.min_match_len, self.prefix_window
            )));
        }
        Ok(())
    }

    /// Override the prefix window.
    pub fn with_prefix_window(mut self, window: usize) -> Self {
        self.prefix_window = window;
        self
    }

    /// Override the minimum match length.
    pub fn with_min_match_len(mut self, len: usize) -> Self {
        self.min_match_len = len;
        self
    }
}

/// Tunables for the truncation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    /// Decay constant `k` in `w(i) = exp(-k * min(i, n - i))`.
    #[serde(default = "default_decay_k")]
    pub decay_k: f64,

    /// Minimum non-zero allocation per task when the budget is infeasible.
    #[serde(default = "default_floor_bytes")]
    pub floor_bytes: usize,
}

fn default_decay_k() -> f64 {
    DEFAULT_DECAY_K
}

fn default_floor_bytes() -> usize {
    DEFAULT_FLOOR_BYTES
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            decay_k: default_decay_k(),
            floor_bytes: default_floor_bytes(),
        }
    }
}

impl TruncationConfig {
    /// Validate the decay constant.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.decay_k > 0.0) || !self.decay_k.is_finite() {
            return Err(CoreError::InvalidConfig(format!(
                "decay_k must be a positive finite number, got {}",
                self.decay_k
            )));
        }
        if self.floor_bytes == 0 {
            return Err(CoreError::InvalidConfig(
                "floor_bytes must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Override the decay constant.
    pub fn with_decay_k(mut self, k: f64) -> Self {
        self.decay_k = k;
        self
    }
}
