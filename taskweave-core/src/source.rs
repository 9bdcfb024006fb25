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

//! Conversation source collaborator interface.
//!
//! Raw storage discovery and file I/O live outside the core; the engines
//! consume this abstract source, which yields one ordered record stream per
//! task. Each raw record shape is an explicit tagged variant rather than a
//! shape-sniffed JSON blob.

use crate::error::Result;
use crate::message::MessageRole;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One record from a task's raw log, in storage order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRecord {
    /// A plain conversation message.
    Message {
        role: MessageRole,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp_us: Option<u64>,
    },
    /// A tool invocation and its result, flattened to text for indexing.
    ToolCall {
        name: String,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp_us: Option<u64>,
    },
    /// A record the source could not decode. Carried through so the builder
    /// can count it; never aborts a batch.
    Undecodable {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Per-task metadata supplied by the source alongside the raw records.
///
/// `created_at_us` is the explicit fallback for a task whose message history
/// carries no reliable timestamp. The builder never substitutes wall-clock
/// time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Raw (unnormalized) workspace path for this task.
    pub workspace: String,
    /// Creation time recorded by the source, microseconds since epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_us: Option<u64>,
}

/// Filter for task enumeration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Restrict to tasks whose workspace normalizes to this path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Restrict to tasks started at or after this time (microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since_us: Option<u64>,
}

/// Abstract provider of raw conversation data.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Enumerate task ids matching the filter.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<String>>;

    /// Read the ordered raw records for one task, plus its metadata.
    async fn read_raw_records(&self, task_id: &str) -> Result<(Vec<RawRecord>, TaskMetadata)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_round_trips_as_tagged_json() {
        let record = RawRecord::Message {
            role: MessageRole::User,
            text: "hello".to_string(),
            timestamp_us: Some(42),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "message");
        let back: RawRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_undecodable_is_a_first_class_variant() {
        let json = serde_json::json!({ "kind": "undecodable", "reason": "bom corruption" });
        let record: RawRecord = serde_json::from_value(json).unwrap();
        assert!(matches!(record, RawRecord::Undecodable { .. }));
    }
}
