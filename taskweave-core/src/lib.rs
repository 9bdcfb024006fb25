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

//! Taskweave Core
//!
//! Reconstructs the hierarchical structure of recorded multi-step agent
//! conversations from flat, append-only log storage, and compresses task
//! chains to fit a size budget while keeping the most informative parts.

pub mod config;
pub mod error;
pub mod extract;
pub mod hierarchy;
pub mod message;
pub mod pipeline;
pub mod resilience;
pub mod skeleton;
pub mod source;
pub mod truncation;
pub mod workspace;

pub use config::{
    ReconstructionConfig, TruncationConfig, DEFAULT_DECAY_K, DEFAULT_FLOOR_BYTES,
    DEFAULT_MIN_MATCH_LEN, DEFAULT_PREFIX_WINDOW,
};
pub use error::{CoreError, Result};
pub use extract::{Instruction, InstructionExtractor, InstructionScanner};
pub use hierarchy::{Forest, HierarchyEdge, HierarchyEngine, ReconstructionDiagnostics};
pub use message::{ConversationMessage, MessageRole};
pub use pipeline::{PipelineDiagnostics, ReconstructionPipeline, ReconstructionReport};
pub use resilience::{
    BreakerState, CallPermit, CircuitBreaker, CircuitConfig, CircuitError, FailureClass,
};
pub use skeleton::{
    BuildDiagnostics, BuildOutcome, ConversationSkeleton, ExtractedInstruction, SkeletonBuilder,
};
pub use source::{ConversationSource, RawRecord, TaskFilter, TaskMetadata};
pub use truncation::{TaskPlan, TruncatedTask, TruncationEngine, TruncationPlan};
pub use workspace::{normalize_workspace_path, WorkspaceKey};
