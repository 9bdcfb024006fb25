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

//! Chain truncation under a byte budget.
//!
//! Given a root…leaf ancestor chain and a total budget, assigns each task a
//! preservation weight from a symmetric exponential gradient (ends heavy,
//! middle light), allocates the budget proportionally, and keeps each task's
//! head and tail up to its allocation. The same primacy/recency bias applies
//! at both levels: the chain keeps its ends, and a truncated task keeps its
//! own start and end.
//!
//! Plans are derived values; applying a plan never mutates the skeletons it
//! was computed from.

use crate::config::TruncationConfig;
use crate::error::Result;
use crate::skeleton::ConversationSkeleton;
use serde::{Deserialize, Serialize};

/// Bytes reserved inside an allocation for the truncation marker.
const MARKER_RESERVE: usize = 40;

/// Per-task slice of a truncation plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub task_id: String,
    /// Weight from the symmetric decay gradient, in `(0, 1]`.
    pub preservation_weight: f64,
    /// Bytes of content this task may keep (marker included).
    pub allocation: usize,
    /// Byte ranges of the task's content to keep, in order.
    pub keep_ranges: Vec<(usize, usize)>,
    /// True when the allocation only covers a placeholder marker.
    pub dropped: bool,
}

/// A full plan for one chain evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncationPlan {
    pub tasks: Vec<TaskPlan>,
    /// The caller's budget. Total kept bytes never exceed it.
    pub total_budget: usize,
    /// Set when the budget was below `floor × chain length` and the plan
    /// degraded to floor allocations. A warning, not an error.
    pub budget_infeasible: bool,
}

impl TruncationPlan {
    /// Total bytes the plan keeps across all tasks.
    pub fn total_kept(&self) -> usize {
        self.tasks
            .iter()
            .map(|t| {
                t.keep_ranges
                    .iter()
                    .map(|(start, end)| end - start)
                    .sum::<usize>()
            })
            .sum()
    }
}

/// One task's content after a plan is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TruncatedTask {
    pub task_id: String,
    pub content: String,
    pub truncated: bool,
}

/// The truncation engine. Pure over its inputs.
#[derive(Debug, Clone, Default)]
pub struct TruncationEngine {
    config: TruncationConfig,
}

impl TruncationEngine {
    pub fn new(config: TruncationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Preservation weights for a chain of `n` tasks:
    /// `w(i) = exp(-k * min(i, last - i))`, so both ends get 1.0 and the
    /// middle gets the minimum.
    pub fn weights(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let last = n - 1;
        (0..n)
            .map(|i| {
                let depth = i.min(last - i) as f64;
                (-self.config.decay_k * depth).exp()
            })
            .collect()
    }

    /// Compute a truncation plan for an ordered root…leaf chain.
    pub fn plan_chain(&self, chain: &[ConversationSkeleton], budget: usize) -> TruncationPlan {
        let n = chain.len();
        if n == 0 {
            return TruncationPlan {
                tasks: Vec::new(),
                total_budget: budget,
                budget_infeasible: false,
            };
        }

        let weights = self.weights(n);
        let contents: Vec<usize> = chain.iter().map(|s| s.content_text().len()).collect();

        let floor = self.config.floor_bytes;
        let budget_infeasible = budget < floor * n;
        let allocations = if budget_infeasible {
            tracing::warn!(
                budget,
                chain_len = n,
                floor,
                "budget below floor for chain; degrading to floor allocations"
            );
            vec![floor; n]
        } else {
            self.allocate(budget, &weights, &contents)
        };

        let tasks = chain
            .iter()
            .zip(weights.iter())
            .zip(allocations.iter())
            .map(|((skeleton, &weight), &allocation)| {
                let content_len = skeleton.content_text().len();
                let (keep_ranges, dropped) = keep_ranges(content_len, allocation);
                TaskPlan {
                    task_id: skeleton.task_id.clone(),
                    preservation_weight: weight,
                    allocation,
                    keep_ranges,
                    dropped,
                }
            })
            .collect();

        TruncationPlan {
            tasks,
            total_budget: budget,
            budget_infeasible,
        }
    }

    /// Apply a plan to the chain it was computed from, materializing the
    /// kept content per task.
    pub fn apply(&self, plan: &TruncationPlan, chain: &[ConversationSkeleton]) -> Vec<TruncatedTask> {
        plan.tasks
            .iter()
            .zip(chain.iter())
            .map(|(task_plan, skeleton)| {
                let content = skeleton.content_text();
                materialize(task_plan, &content)
            })
            .collect()
    }

    /// Proportional allocation with iterative surplus redistribution.
    ///
    /// Tasks whose native size fits their share are capped at that size and
    /// their surplus flows back to tasks still over their allocation,
    /// proportionally by weight, until stable.
    fn allocate(&self, budget: usize, weights: &[f64], contents: &[usize]) -> Vec<usize> {
        let n = weights.len();
        let floor = self.config.floor_bytes;

        // Floor first, proportional split of the remainder. Keeps the sum
        // exactly at the budget while guaranteeing a non-zero minimum.
        let proportional = distribute(budget - floor * n, weights, &(0..n).collect::<Vec<_>>());
        let mut alloc: Vec<usize> = proportional.into_iter().map(|share| floor + share).collect();

        let mut capped = vec![false; n];
        loop {
            let mut surplus = 0usize;
            for i in 0..n {
                if !capped[i] && contents[i] <= alloc[i] {
                    surplus += alloc[i] - contents[i];
                    alloc[i] = contents[i];
                    capped[i] = true;
                }
            }
            let open: Vec<usize> = (0..n)
                .filter(|&i| !capped[i] && contents[i] > alloc[i])
                .collect();
            if surplus == 0 || open.is_empty() {
                break;
            }
            let open_weights: Vec<f64> = open.iter().map(|&i| weights[i]).collect();
            let extra = distribute(surplus, &open_weights, &(0..open.len()).collect::<Vec<_>>());
            for (slot, &i) in open.iter().enumerate() {
                alloc[i] += extra[slot];
            }
        }

        alloc
    }
}

/// Split `budget` proportionally to `weights[indices]`, summing exactly to
/// `budget` (largest-remainder rounding, deterministic).
fn distribute(budget: usize, weights: &[f64], indices: &[usize]) -> Vec<usize> {
    let total: f64 = indices.iter().map(|&i| weights[i]).sum();
    if total <= 0.0 || indices.is_empty() {
        return vec![0; indices.len()];
    }

    let mut shares: Vec<usize> = Vec::with_capacity(indices.len());
    let mut remainders: Vec<(usize, f64)> = Vec::with_capacity(indices.len());
    let mut assigned = 0usize;
    for (slot, &i) in indices.iter().enumerate() {
        let exact = weights[i] / total * budget as f64;
        let base = exact.floor() as usize;
        shares.push(base);
        remainders.push((slot, exact - base as f64));
        assigned += base;
    }

    // Hand out the leftover bytes to the largest remainders; ties resolve
    // by position so the result is stable.
    let mut leftover = budget.saturating_sub(assigned);
    remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    for (slot, _) in remainders {
        if leftover == 0 {
            break;
        }
        shares[slot] += 1;
        leftover -= 1;
    }

    shares
}

/// Byte ranges to keep for a task of `content_len` bytes under `allocation`.
///
/// Keeps both ends and drops the middle; an allocation that only covers the
/// marker keeps nothing and marks the task dropped.
fn keep_ranges(content_len: usize, allocation: usize) -> (Vec<(usize, usize)>, bool) {
    if content_len <= allocation {
        if content_len == 0 {
            return (Vec::new(), false);
        }
        return (vec![(0, content_len)], false);
    }

    let text_budget = allocation.saturating_sub(MARKER_RESERVE);
    if text_budget == 0 {
        return (Vec::new(), true);
    }

    let head = text_budget / 2 + text_budget % 2;
    let tail = text_budget / 2;
    let mut ranges = vec![(0, head)];
    if tail > 0 {
        ranges.push((content_len - tail, content_len));
    }
    (ranges, false)
}

fn materialize(plan: &TaskPlan, content: &str) -> TruncatedTask {
    if plan.keep_ranges.is_empty() {
        // Empty keep ranges mean either a task with no content (nothing was
        // cut) or a dropped task whose allocation only covers the marker.
        return TruncatedTask {
            task_id: plan.task_id.clone(),
            content: if plan.dropped {
                marker(content.len())
            } else {
                String::new()
            },
            truncated: plan.dropped,
        };
    }

    if plan.keep_ranges.len() == 1 && plan.keep_ranges[0] == (0, content.len()) {
        return TruncatedTask {
            task_id: plan.task_id.clone(),
            content: content.to_string(),
            truncated: false,
        };
    }

    let mut out = String::new();
    let mut kept = 0usize;
    for &(start, end) in &plan.keep_ranges {
        let start = snap_down(content, start.min(content.len()));
        let end = snap_down(content, end.min(content.len()));
        if end <= start {
            continue;
        }
        if !out.is_empty() {
            out.push_str(&marker(content.len().saturating_sub(kept + (end - start))));
        }
        out.push_str(&content[start..end]);
        kept += end - start;
    }

    TruncatedTask {
        task_id: plan.task_id.clone(),
        content: out,
        truncated: true,
    }
}

fn marker(omitted: usize) -> String {
    format!("\n[... {omitted} bytes truncated ...]\n")
}

/// Snap a byte offset down to the nearest char boundary.
fn snap_down(text: &str, mut offset: usize) -> usize {
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}
