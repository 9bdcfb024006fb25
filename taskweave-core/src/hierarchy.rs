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

//! Hierarchy reconstruction.
//!
//! Takes a batch of skeletons from one workspace window (no parent links
//! yet) and computes parent→child edges by matching each child's first
//! message against launch instructions found in candidate parents' own
//! message streams. The result is a forest with per-edge confidence.
//!
//! The policy is a deterministic, explainable best-match: ties never resolve
//! randomly, ambiguity is flagged rather than hidden, and a candidate that
//! would reverse time or close a cycle aborts the batch because it means the
//! upstream data is corrupt.

use crate::config::ReconstructionConfig;
use crate::error::{CoreError, Result};
use crate::extract::normalize_for_match;
use crate::skeleton::ConversationSkeleton;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Confidence multiplier applied when the top score was shared by more than
/// one candidate and the tie-break picked the winner.
const AMBIGUOUS_CONFIDENCE_FACTOR: f64 = 0.5;

/// A reconstructed parent→child edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    pub parent_task_id: String,
    pub child_task_id: String,
    /// Match length over compared prefix length, possibly reduced for
    /// ambiguous assignments. In `(0, 1]`.
    pub confidence: f64,
}

/// Diagnostics for one reconstruction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionDiagnostics {
    /// Tasks in the batch.
    pub batch_size: usize,
    /// Assignments where multiple candidates tied at the top score.
    pub ambiguous_parents: usize,
    /// Tasks left without a parent.
    pub root_count: usize,
}

/// The reconstructed forest for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forest {
    /// Skeletons keyed by task id, with parent links and confidence filled
    /// in. BTreeMap keeps iteration deterministic.
    pub skeletons: BTreeMap<String, ConversationSkeleton>,
    /// All edges, ordered by child task id.
    pub edges: Vec<HierarchyEdge>,
    /// Task ids with no parent, ordered.
    pub roots: Vec<String>,
    pub diagnostics: ReconstructionDiagnostics,
}

impl Forest {
    /// Resolve the root…leaf ancestor chain ending at `task_id`.
    ///
    /// Returns `None` if the task is not in this forest.
    pub fn ancestor_chain(&self, task_id: &str) -> Option<Vec<&ConversationSkeleton>> {
        let mut chain = Vec::new();
        let mut current = self.skeletons.get(task_id)?;
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current.task_id.as_str()) {
                // Construction rejects cycles; an inconsistent forest is a
                // caller-side mutation, treat the walk as exhausted.
                break;
            }
            chain.push(current);
            match current.parent_task_id.as_deref() {
                Some(parent_id) => match self.skeletons.get(parent_id) {
                    Some(parent) => current = parent,
                    None => break,
                },
                None => break,
            }
        }
        chain.reverse();
        Some(chain)
    }

    /// Children of a task, ordered by task id.
    pub fn children_of(&self, task_id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.parent_task_id == task_id)
            .map(|e| e.child_task_id.as_str())
            .collect()
    }
}

/// Length of the case/whitespace-insensitive common prefix between two
/// normalized strings, each windowed to `window` characters. Non-zero only
/// when one windowed string is a prefix of the other.
fn prefix_match_len(a: &str, b: &str, window: usize) -> usize {
    let a_chars: Vec<char> = a.chars().take(window).collect();
    let b_chars: Vec<char> = b.chars().take(window).collect();
    let shorter = a_chars.len().min(b_chars.len());
    if shorter == 0 {
        return 0;
    }
    if a_chars[..shorter] == b_chars[..shorter] {
        shorter
    } else {
        0
    }
}

#[derive(Debug)]
struct Candidate<'a> {
    parent_id: &'a str,
    score: usize,
    prefix_len: usize,
    time_distance: u64,
}

/// The hierarchy reconstruction engine. Pure over its call-scoped inputs;
/// batches for different workspaces may run in parallel freely.
#[derive(Debug, Clone, Default)]
pub struct HierarchyEngine {
    config: ReconstructionConfig,
}

impl HierarchyEngine {
    pub fn new(config: ReconstructionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Reconstruct parent→child edges for a batch of skeletons.
    ///
    /// All tasks sharing a workspace window must be present in the same
    /// batch: candidate scoring needs to see every potential parent.
    pub fn reconstruct(&self, batch: Vec<ConversationSkeleton>) -> Result<Forest> {
        let mut skeletons: BTreeMap<String, ConversationSkeleton> = batch
            .into_iter()
            .map(|mut s| {
                // Stale links from a previous pass would corrupt scoring.
                s.parent_task_id = None;
                s.confidence = None;
                s.parent_ambiguous = false;
                (s.task_id.clone(), s)
            })
            .collect();

        let diagnostics_batch_size = skeletons.len();
        let child_ids: Vec<String> = skeletons.keys().cloned().collect();

        let mut edges = Vec::new();
        let mut ambiguous_parents = 0usize;

        for child_id in &child_ids {
            let assignment = {
                let child = &skeletons[child_id];
                self.best_parent(child, &skeletons)
            };

            let Some((parent_id, confidence, ambiguous)) = assignment else {
                continue;
            };

            if ambiguous {
                ambiguous_parents += 1;
                tracing::debug!(
                    child = child_id.as_str(),
                    parent = parent_id.as_str(),
                    "multiple candidates tied; deterministic tie-break applied"
                );
            }

            let child = skeletons.get_mut(child_id).expect("child id from keys");
            child.parent_task_id = Some(parent_id.clone());
            child.confidence = Some(confidence);
            child.parent_ambiguous = ambiguous;

            edges.push(HierarchyEdge {
                parent_task_id: parent_id,
                child_task_id: child_id.clone(),
                confidence,
            });
        }

        self.enforce_invariants(&skeletons, &edges)?;

        let roots: Vec<String> = skeletons
            .values()
            .filter(|s| s.parent_task_id.is_none())
            .map(|s| s.task_id.clone())
            .collect();

        let diagnostics = ReconstructionDiagnostics {
            batch_size: diagnostics_batch_size,
            ambiguous_parents,
            root_count: roots.len(),
        };

        Ok(Forest {
            skeletons,
            edges,
            roots,
            diagnostics,
        })
    }

    /// Score all candidate parents for one child and pick the best.
    ///
    /// Returns `(parent_id, confidence, ambiguous)`, or `None` when the
    /// child is a root.
    fn best_parent(
        &self,
        child: &ConversationSkeleton,
        skeletons: &BTreeMap<String, ConversationSkeleton>,
    ) -> Option<(String, f64, bool)> {
        let first_message = child.first_message_text()?;
        let child_prefix = normalize_for_match(first_message);
        if child_prefix.is_empty() {
            return None;
        }

        let mut candidates: Vec<Candidate<'_>> = Vec::new();

        // BTreeMap order makes candidate collection deterministic.
        for parent in skeletons.values() {
            if parent.task_id == child.task_id {
                continue;
            }
            // Temporal precedence and workspace equality filters.
            if parent.start_time_us > child.start_time_us {
                continue;
            }
            if parent.workspace != child.workspace {
                continue;
            }

            let mut best_for_parent: Option<(usize, usize)> = None;
            for extracted in &parent.extracted_instructions {
                let instruction = normalize_for_match(&extracted.instruction.normalized_prefix);
                let score = prefix_match_len(&instruction, &child_prefix, self.config.prefix_window);
                if score < self.config.min_match_len {
                    continue;
                }
                let prefix_len = instruction.chars().count().min(self.config.prefix_window).max(1);
                if best_for_parent.map_or(true, |(s, _)| score > s) {
                    best_for_parent = Some((score, prefix_len));
                }
            }

            if let Some((score, prefix_len)) = best_for_parent {
                candidates.push(Candidate {
                    parent_id: &parent.task_id,
                    score,
                    prefix_len,
                    time_distance: child.start_time_us.saturating_sub(parent.start_time_us),
                });
            }
        }

        if candidates.is_empty() {
            return None;
        }

        let top_score = candidates.iter().map(|c| c.score).max().expect("non-empty");
        let mut top: Vec<&Candidate<'_>> =
            candidates.iter().filter(|c| c.score == top_score).collect();
        let ambiguous = top.len() > 1;

        // Closest launch wins; final tie-break is lexical id order.
        top.sort_by(|a, b| {
            a.time_distance
                .cmp(&b.time_distance)
                .then_with(|| a.parent_id.cmp(b.parent_id))
        });
        let winner = top[0];

        let mut confidence = winner.score as f64 / winner.prefix_len as f64;
        if ambiguous {
            confidence *= AMBIGUOUS_CONFIDENCE_FACTOR;
        }

        Some((winner.parent_id.to_string(), confidence, ambiguous))
    }

    /// Defensive re-check of temporal precedence and acyclicity. The
    /// candidate filter makes violations unreachable unless timestamps were
    /// corrupted after filtering, which is exactly when a batch must abort.
    fn enforce_invariants(
        &self,
        skeletons: &BTreeMap<String, ConversationSkeleton>,
        edges: &[HierarchyEdge],
    ) -> Result<()> {
        for edge in edges {
            let parent = skeletons.get(&edge.parent_task_id);
            let child = skeletons.get(&edge.child_task_id);
            let (Some(parent), Some(child)) = (parent, child) else {
                return Err(CoreError::InvariantViolation {
                    detail: format!(
                        "edge {} -> {} references a task outside the batch",
                        edge.parent_task_id, edge.child_task_id
                    ),
                });
            };
            if parent.start_time_us > child.start_time_us {
                return Err(CoreError::InvariantViolation {
                    detail: format!(
                        "edge {} -> {} reverses temporal precedence",
                        edge.parent_task_id, edge.child_task_id
                    ),
                });
            }
        }

        // Walk parent links from every node; revisiting a node within one
        // walk means a cycle.
        for start in skeletons.keys() {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            while let Some(skeleton) = skeletons.get(current) {
                if !seen.insert(skeleton.task_id.as_str()) {
                    return Err(CoreError::InvariantViolation {
                        detail: format!("cycle detected through task {current}"),
                    });
                }
                match skeleton.parent_task_id.as_deref() {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Instruction;
    use crate::message::ConversationMessage;
    use crate::skeleton::ExtractedInstruction;
    use crate::workspace::WorkspaceKey;

    fn skeleton(
        task_id: &str,
        workspace: &str,
        start_time_us: u64,
        first_message: &str,
        instructions: &[&str],
    ) -> ConversationSkeleton {
        ConversationSkeleton {
            task_id: task_id.to_string(),
            parent_task_id: None,
            workspace: WorkspaceKey::new(workspace),
            start_time_us,
            end_time_us: None,
            messages: vec![ConversationMessage::user(first_message, Some(start_time_us))],
            extracted_instructions: instructions
                .iter()
                .map(|text| ExtractedInstruction {
                    instruction: Instruction {
                        normalized_prefix: text.to_string(),
                        mode: None,
                        raw_text: text.to_string(),
                    },
                    source_message_index: 0,
                })
                .collect(),
            confidence: None,
            parent_ambiguous: false,
        }
    }

    #[test]
    fn test_prefix_match_len() {
        assert_eq!(prefix_match_len("fix the build", "fix the build now", 50), 13);
        assert_eq!(prefix_match_len("fix the build", "break the build", 50), 0);
        assert_eq!(prefix_match_len("", "anything", 50), 0);
        // Windowing caps the comparison.
        assert_eq!(prefix_match_len("abcdef", "abcxyz", 3), 3);
    }

    #[test]
    fn test_simple_parent_resolution() {
        let engine = HierarchyEngine::default();
        let parent = skeleton("a", "/ws", 0, "root task", &["Fix bug #42 in parser"]);
        let child = skeleton("b", "/ws", 5, "Fix bug #42 in parser module", &[]);
        let forest = engine.reconstruct(vec![parent, child]).unwrap();

        assert_eq!(forest.edges.len(), 1);
        let edge = &forest.edges[0];
        assert_eq!(edge.parent_task_id, "a");
        assert_eq!(edge.child_task_id, "b");
        assert!(edge.confidence > 0.9, "confidence was {}", edge.confidence);
        assert_eq!(forest.roots, vec!["a".to_string()]);
    }

    #[test]
    fn test_workspace_mismatch_excludes_candidate() {
        let engine = HierarchyEngine::default();
        let parent = skeleton("a", "/ws-one", 0, "root", &["Fix bug #42 in parser"]);
        let child = skeleton("b", "/ws-two", 5, "Fix bug #42 in parser module", &[]);
        let forest = engine.reconstruct(vec![parent, child]).unwrap();
        assert!(forest.edges.is_empty());
        assert_eq!(forest.diagnostics.root_count, 2);
    }

    #[test]
    fn test_later_task_cannot_be_parent() {
        let engine = HierarchyEngine::default();
        let late = skeleton("a", "/ws", 100, "root", &["Fix bug #42 in parser"]);
        let child = skeleton("b", "/ws", 5, "Fix bug #42 in parser module", &[]);
        let forest = engine.reconstruct(vec![late, child]).unwrap();
        assert!(forest.edges.is_empty());
    }

    #[test]
    fn test_short_overlap_below_threshold_is_root() {
        let engine = HierarchyEngine::default();
        let parent = skeleton("a", "/ws", 0, "root", &["Fix the"]);
        let child = skeleton("b", "/ws", 5, "Fix the printer firmware", &[]);
        // "fix the" is 7 normalized chars, below the default threshold of 10.
        let forest = engine.reconstruct(vec![parent, child]).unwrap();
        assert!(forest.edges.is_empty());
    }

    #[test]
    fn test_tie_breaks_on_time_then_id_and_flags_ambiguity() {
        let engine = HierarchyEngine::default();
        let p1 = skeleton("p-early", "/ws", 0, "r", &["Fix bug #42 in parser"]);
        let p2 = skeleton("p-late", "/ws", 4, "r", &["Fix bug #42 in parser"]);
        let child = skeleton("c", "/ws", 5, "Fix bug #42 in parser module", &[]);
        let forest = engine.reconstruct(vec![p1, p2, child]).unwrap();

        assert_eq!(forest.edges.len(), 1);
        // Closest launch wins.
        assert_eq!(forest.edges[0].parent_task_id, "p-late");
        assert!(forest.skeletons["c"].parent_ambiguous);
        assert_eq!(forest.diagnostics.ambiguous_parents, 1);
        // Reduced confidence compared to an unambiguous assignment.
        assert!(forest.edges[0].confidence < 0.9);
    }

    #[test]
    fn test_equal_time_distance_breaks_on_lexical_id() {
        let engine = HierarchyEngine::default();
        let p1 = skeleton("p-b", "/ws", 3, "r", &["Fix bug #42 in parser"]);
        let p2 = skeleton("p-a", "/ws", 3, "r", &["Fix bug #42 in parser"]);
        let child = skeleton("c", "/ws", 5, "Fix bug #42 in parser module", &[]);
        let forest = engine.reconstruct(vec![p1, p2, child]).unwrap();
        assert_eq!(forest.edges[0].parent_task_id, "p-a");
    }

    #[test]
    fn test_determinism_across_runs() {
        let engine = HierarchyEngine::default();
        let make_batch = || {
            vec![
                skeleton("p1", "/ws", 0, "r", &["Fix bug #42 in parser"]),
                skeleton("p2", "/ws", 2, "r", &["Fix bug #42 in parser"]),
                skeleton("c1", "/ws", 5, "Fix bug #42 in parser module", &[]),
                skeleton("c2", "/ws", 6, "Fix bug #42 in parser module", &[]),
            ]
        };
        let first = engine.reconstruct(make_batch()).unwrap();
        let second = engine.reconstruct(make_batch()).unwrap();
        assert_eq!(first.edges, second.edges);
        assert_eq!(first.roots, second.roots);
    }

    #[test]
    fn test_ancestor_chain_resolution() {
        let engine = HierarchyEngine::default();
        let root = skeleton("r", "/ws", 0, "top", &["do the middle piece of work"]);
        let mid = skeleton("m", "/ws", 5, "do the middle piece of work", &["do the leaf piece of work"]);
        let leaf = skeleton("l", "/ws", 10, "do the leaf piece of work", &[]);
        let forest = engine.reconstruct(vec![root, mid, leaf]).unwrap();

        let chain = forest.ancestor_chain("l").unwrap();
        let ids: Vec<&str> = chain.iter().map(|s| s.task_id.as_str()).collect();
        assert_eq!(ids, vec!["r", "m", "l"]);
    }

    #[test]
    fn test_temporal_precedence_holds_for_all_edges() {
        let engine = HierarchyEngine::default();
        let batch = vec![
            skeleton("a", "/ws", 0, "top", &["branch one of the work", "branch two of the work"]),
            skeleton("b", "/ws", 3, "branch one of the work", &[]),
            skeleton("c", "/ws", 4, "branch two of the work", &[]),
        ];
        let forest = engine.reconstruct(batch).unwrap();
        for edge in &forest.edges {
            let parent = &forest.skeletons[&edge.parent_task_id];
            let child = &forest.skeletons[&edge.child_task_id];
            assert!(parent.start_time_us <= child.start_time_us);
        }
    }
}
