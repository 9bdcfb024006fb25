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

//! Property tests for the truncation engine's budget and weight invariants.

use proptest::prelude::*;
use taskweave_core::{
    ConversationMessage, ConversationSkeleton, TruncationEngine, WorkspaceKey, DEFAULT_FLOOR_BYTES,
};

fn chain_task(task_id: &str, content_bytes: usize) -> ConversationSkeleton {
    let body = "x".repeat(content_bytes);
    ConversationSkeleton {
        task_id: task_id.to_string(),
        parent_task_id: None,
        workspace: WorkspaceKey::new("/ws"),
        start_time_us: 0,
        end_time_us: None,
        messages: vec![ConversationMessage::user(body, Some(0))],
        extracted_instructions: Vec::new(),
        confidence: None,
        parent_ambiguous: false,
    }
}

fn arb_chain() -> impl Strategy<Value = Vec<ConversationSkeleton>> {
    prop::collection::vec(0usize..8_000, 1..12).prop_map(|sizes| {
        sizes
            .into_iter()
            .enumerate()
            .map(|(i, size)| chain_task(&format!("t{i}"), size))
            .collect()
    })
}

proptest! {
    #[test]
    fn kept_bytes_never_exceed_a_feasible_budget(
        chain in arb_chain(),
        budget_per_task in 64usize..4_000,
    ) {
        let budget = budget_per_task * chain.len();
        let engine = TruncationEngine::default();
        let plan = engine.plan_chain(&chain, budget);

        prop_assert!(!plan.budget_infeasible);
        prop_assert!(plan.total_kept() <= budget);
    }

    #[test]
    fn feasible_allocations_respect_the_floor(
        chain in arb_chain(),
        budget_per_task in 64usize..4_000,
    ) {
        let budget = budget_per_task * chain.len();
        let engine = TruncationEngine::default();
        let plan = engine.plan_chain(&chain, budget);

        for (task, skeleton) in plan.tasks.iter().zip(chain.iter()) {
            let content_len = skeleton.content_text().len();
            // A task never gets less than the floor unless its own content
            // is smaller than the floor.
            prop_assert!(task.allocation >= DEFAULT_FLOOR_BYTES.min(content_len));
        }
    }

    #[test]
    fn weights_are_symmetric_with_whole_ends(n in 1usize..64) {
        let engine = TruncationEngine::default();
        let w = engine.weights(n);

        prop_assert_eq!(w.len(), n);
        prop_assert!((w[0] - 1.0).abs() < f64::EPSILON);
        prop_assert!((w[n - 1] - 1.0).abs() < f64::EPSILON);
        for i in 0..n {
            prop_assert!(w[i] > 0.0 && w[i] <= 1.0);
            prop_assert!((w[i] - w[n - 1 - i]).abs() < 1e-12);
        }
        // Monotonically non-increasing from the front toward the middle.
        for i in 0..n / 2 {
            prop_assert!(w[i] >= w[i + 1]);
        }
    }

    #[test]
    fn planning_is_deterministic(
        chain in arb_chain(),
        budget in 0usize..20_000,
    ) {
        let engine = TruncationEngine::default();
        let first = engine.plan_chain(&chain, budget);
        let second = engine.plan_chain(&chain, budget);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn materialized_content_stays_within_allocation(
        chain in arb_chain(),
        budget_per_task in 128usize..4_000,
    ) {
        let budget = budget_per_task * chain.len();
        let engine = TruncationEngine::default();
        let plan = engine.plan_chain(&chain, budget);
        let applied = engine.apply(&plan, &chain);

        for (task, result) in plan.tasks.iter().zip(applied.iter()) {
            if result.truncated {
                prop_assert!(result.content.len() <= task.allocation);
            }
        }
    }
}
