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

//! End-to-end reconstruction pipeline.
//!
//! Wires a conversation source, the skeleton builder and the hierarchy
//! engine into the `reconstruct_hierarchy(workspace)` operation the
//! protocol layer calls. Skeleton builds are independent per task; batches
//! for different workspaces may run concurrently.

use crate::config::ReconstructionConfig;
use crate::error::Result;
use crate::hierarchy::{Forest, HierarchyEngine};
use crate::skeleton::{BuildDiagnostics, SkeletonBuilder};
use crate::source::{ConversationSource, TaskFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregate diagnostics from one workspace pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Tasks enumerated by the source.
    pub tasks_listed: usize,
    /// Tasks dropped because no skeleton could be built.
    pub tasks_dropped: usize,
    /// Raw records skipped across all tasks.
    pub records_skipped: usize,
}

/// Result of reconstructing one workspace.
#[derive(Debug, Clone)]
pub struct ReconstructionReport {
    pub forest: Forest,
    pub diagnostics: PipelineDiagnostics,
    /// Per-task build diagnostics for tasks that were dropped.
    pub dropped: BTreeMap<String, BuildDiagnostics>,
}

/// Reconstruction pipeline over an abstract conversation source.
pub struct ReconstructionPipeline {
    source: Arc<dyn ConversationSource>,
    builder: SkeletonBuilder,
    engine: HierarchyEngine,
}

impl ReconstructionPipeline {
    pub fn new(source: Arc<dyn ConversationSource>, config: ReconstructionConfig) -> Result<Self> {
        Ok(Self {
            source,
            builder: SkeletonBuilder::new(),
            engine: HierarchyEngine::new(config)?,
        })
    }

    /// Reconstruct the task forest for one workspace.
    ///
    /// Per-record and per-task parse failures become diagnostics; the only
    /// hard failure is an invariant violation inside the batch.
    pub async fn reconstruct_workspace(&self, workspace: &str) -> Result<ReconstructionReport> {
        let filter = TaskFilter {
            workspace: Some(workspace.to_string()),
            since_us: None,
        };
        let task_ids = self.source.list_tasks(&filter).await?;

        let mut diagnostics = PipelineDiagnostics {
            tasks_listed: task_ids.len(),
            ..Default::default()
        };
        let mut dropped = BTreeMap::new();
        let mut batch = Vec::new();

        for task_id in &task_ids {
            let (records, metadata) = match self.source.read_raw_records(task_id).await {
                Ok(read) => read,
                Err(e) => {
                    tracing::warn!(task_id = task_id.as_str(), error = %e, "source failed for task; dropping");
                    diagnostics.tasks_dropped += 1;
                    dropped.insert(task_id.clone(), BuildDiagnostics {
                        skipped_records: 0,
                        drop_reason: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let outcome = self.builder.build(task_id, &records, &metadata);
            diagnostics.records_skipped += outcome.diagnostics.skipped_records;
            match outcome.skeleton {
                Some(skeleton) => batch.push(skeleton),
                None => {
                    diagnostics.tasks_dropped += 1;
                    dropped.insert(task_id.clone(), outcome.diagnostics);
                }
            }
        }

        let forest = self.engine.reconstruct(batch)?;
        Ok(ReconstructionReport {
            forest,
            diagnostics,
            dropped,
        })
    }
}
