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

//! Conversation skeletons and the builder that produces them.
//!
//! A skeleton is one task's reconstructed record: ordered messages plus the
//! metadata the hierarchy engine needs. Skeletons are value objects; the
//! builder never sets `parent_task_id` or `confidence`; those belong to the
//! hierarchy engine.

use crate::extract::{Instruction, InstructionExtractor};
use crate::message::{ConversationMessage, MessageRole};
use crate::source::{RawRecord, TaskMetadata};
use crate::workspace::WorkspaceKey;
use serde::{Deserialize, Serialize};

/// An instruction together with the message it was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInstruction {
    /// The normalized instruction.
    pub instruction: Instruction,
    /// Index into `ConversationSkeleton::messages` of the launching message.
    pub source_message_index: usize,
}

/// Structured representation of one task's message history and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSkeleton {
    /// Opaque unique task identifier.
    pub task_id: String,
    /// Parent assigned by the hierarchy engine; `None` for roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Workspace key, normalized once at construction.
    pub workspace: WorkspaceKey,
    /// Start time, microseconds since epoch. Taken from the first
    /// reliably-timestamped record, falling back to the source's recorded
    /// creation time, never to wall-clock "now".
    pub start_time_us: u64,
    /// End time of the last timestamped record, if the task has closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time_us: Option<u64>,
    /// Ordered messages; insertion order is significant and immutable.
    pub messages: Vec<ConversationMessage>,
    /// Sub-task launch instructions found in this task's own messages.
    pub extracted_instructions: Vec<ExtractedInstruction>,
    /// Match confidence for the assigned parent; `None` for roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Set when multiple candidates tied at the top score and the
    /// deterministic tie-break picked one.
    #[serde(default)]
    pub parent_ambiguous: bool,
}

impl ConversationSkeleton {
    /// Text of the first message, which a parent's launch instruction
    /// should prefix-match.
    pub fn first_message_text(&self) -> Option<&str> {
        self.messages.first().map(|m| m.text.as_str())
    }

    /// All message text concatenated, used for content hashing and
    /// indexing. Skeleton messages themselves are never mutated.
    pub fn content_text(&self) -> String {
        let mut out = String::new();
        for message in &self.messages {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(message.role.as_str());
            out.push_str(": ");
            out.push_str(&message.text);
        }
        out
    }

    /// Total byte length of all message text.
    pub fn content_len(&self) -> usize {
        self.messages.iter().map(|m| m.byte_len()).sum()
    }
}

/// Per-task diagnostics from a build pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    /// Raw records skipped because they could not be decoded.
    pub skipped_records: usize,
    /// Why the whole task was dropped, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

/// Result of building one skeleton. A task that cannot be parsed at all is
/// dropped (`skeleton == None`) with a reason, never a hard error.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub skeleton: Option<ConversationSkeleton>,
    pub diagnostics: BuildDiagnostics,
}

/// Builds skeletons from raw record streams. Pure and stateless apart from
/// the compiled extractor, so builds parallelize per task.
#[derive(Debug, Clone, Default)]
pub struct SkeletonBuilder {
    extractor: InstructionExtractor,
}

impl SkeletonBuilder {
    pub fn new() -> Self {
        Self {
            extractor: InstructionExtractor::new(),
        }
    }

    /// Build one task's skeleton from its ordered raw records.
    pub fn build(
        &self,
        task_id: &str,
        records: &[RawRecord],
        metadata: &TaskMetadata,
    ) -> BuildOutcome {
        let mut diagnostics = BuildDiagnostics::default();
        let mut messages = Vec::new();

        for record in records {
            match record {
                RawRecord::Message {
                    role,
                    text,
                    timestamp_us,
                } => {
                    messages.push(ConversationMessage::new(*role, text.clone(), *timestamp_us));
                }
                RawRecord::ToolCall {
                    name,
                    input,
                    output,
                    timestamp_us,
                } => {
                    let mut text = format!("[tool:{name}] {input}");
                    if let Some(output) = output {
                        text.push_str(" -> ");
                        text.push_str(output);
                    }
                    messages.push(ConversationMessage::new(
                        MessageRole::Tool,
                        text,
                        *timestamp_us,
                    ));
                }
                RawRecord::Undecodable { reason } => {
                    diagnostics.skipped_records += 1;
                    tracing::debug!(
                        task_id,
                        reason = reason.as_deref().unwrap_or("unknown"),
                        "skipping undecodable record"
                    );
                }
            }
        }

        if messages.is_empty() {
            diagnostics.drop_reason = Some("no decodable records".to_string());
            tracing::warn!(task_id, "dropping task with no decodable records");
            return BuildOutcome {
                skeleton: None,
                diagnostics,
            };
        }

        // First reliably-timestamped record wins; the source's recorded
        // creation time is the only permitted fallback.
        let first_timestamp = messages.iter().find_map(|m| m.timestamp_us);
        let start_time_us = match first_timestamp.or(metadata.created_at_us) {
            Some(ts) => ts,
            None => {
                diagnostics.drop_reason =
                    Some("no timestamp in history and no creation time in metadata".to_string());
                tracing::warn!(task_id, "dropping task with no usable timestamp");
                return BuildOutcome {
                    skeleton: None,
                    diagnostics,
                };
            }
        };

        let end_time_us = messages.iter().rev().find_map(|m| m.timestamp_us);

        // Launch markup lives in the parent's own assistant messages.
        let mut extracted_instructions = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            if message.role != MessageRole::Assistant {
                continue;
            }
            for instruction in self.extractor.scan(&message.text) {
                extracted_instructions.push(ExtractedInstruction {
                    instruction,
                    source_message_index: index,
                });
            }
        }

        let skeleton = ConversationSkeleton {
            task_id: task_id.to_string(),
            parent_task_id: None,
            workspace: WorkspaceKey::new(&metadata.workspace),
            start_time_us,
            end_time_us,
            messages,
            extracted_instructions,
            confidence: None,
            parent_ambiguous: false,
        };

        BuildOutcome {
            skeleton: Some(skeleton),
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TaskMetadata;

    fn metadata(workspace: &str, created_at_us: Option<u64>) -> TaskMetadata {
        TaskMetadata {
            workspace: workspace.to_string(),
            created_at_us,
        }
    }

    #[test]
    fn test_start_time_from_first_timestamped_record() {
        let builder = SkeletonBuilder::new();
        let records = vec![
            RawRecord::Message {
                role: MessageRole::User,
                text: "untimed".to_string(),
                timestamp_us: None,
            },
            RawRecord::Message {
                role: MessageRole::Assistant,
                text: "timed".to_string(),
                timestamp_us: Some(5_000),
            },
        ];
        let outcome = builder.build("t1", &records, &metadata("/ws", Some(9_999)));
        let skeleton = outcome.skeleton.unwrap();
        assert_eq!(skeleton.start_time_us, 5_000);
    }

    #[test]
    fn test_metadata_fallback_when_history_untimed() {
        let builder = SkeletonBuilder::new();
        let records = vec![RawRecord::Message {
            role: MessageRole::User,
            text: "untimed".to_string(),
            timestamp_us: None,
        }];
        let outcome = builder.build("t1", &records, &metadata("/ws", Some(7_000)));
        assert_eq!(outcome.skeleton.unwrap().start_time_us, 7_000);
    }

    #[test]
    fn test_dropped_when_no_timestamp_anywhere() {
        let builder = SkeletonBuilder::new();
        let records = vec![RawRecord::Message {
            role: MessageRole::User,
            text: "untimed".to_string(),
            timestamp_us: None,
        }];
        let outcome = builder.build("t1", &records, &metadata("/ws", None));
        assert!(outcome.skeleton.is_none());
        assert!(outcome.diagnostics.drop_reason.is_some());
    }

    #[test]
    fn test_undecodable_records_counted_not_fatal() {
        let builder = SkeletonBuilder::new();
        let records = vec![
            RawRecord::Undecodable { reason: None },
            RawRecord::Message {
                role: MessageRole::User,
                text: "hello".to_string(),
                timestamp_us: Some(1),
            },
            RawRecord::Undecodable {
                reason: Some("bom".to_string()),
            },
        ];
        let outcome = builder.build("t1", &records, &metadata("/ws", None));
        assert_eq!(outcome.diagnostics.skipped_records, 2);
        assert_eq!(outcome.skeleton.unwrap().messages.len(), 1);
    }

    #[test]
    fn test_instructions_extracted_from_assistant_messages_only() {
        let builder = SkeletonBuilder::new();
        let records = vec![
            RawRecord::Message {
                role: MessageRole::User,
                text: "<task>not a launch, quoted by the user</task>".to_string(),
                timestamp_us: Some(1),
            },
            RawRecord::Message {
                role: MessageRole::Assistant,
                text: "spawning: <task>fix the build</task>".to_string(),
                timestamp_us: Some(2),
            },
        ];
        let outcome = builder.build("t1", &records, &metadata("/ws", None));
        let skeleton = outcome.skeleton.unwrap();
        assert_eq!(skeleton.extracted_instructions.len(), 1);
        assert_eq!(skeleton.extracted_instructions[0].source_message_index, 1);
        assert_eq!(
            skeleton.extracted_instructions[0].instruction.normalized_prefix,
            "fix the build"
        );
    }

    #[test]
    fn test_workspace_normalized_at_construction() {
        let builder = SkeletonBuilder::new();
        let records = vec![RawRecord::Message {
            role: MessageRole::User,
            text: "hi".to_string(),
            timestamp_us: Some(1),
        }];
        let outcome = builder.build("t1", &records, &metadata("C:\\Proj\\App\\", None));
        assert_eq!(outcome.skeleton.unwrap().workspace.as_str(), "c:/proj/app");
    }

    #[test]
    fn test_end_time_from_last_timestamped_record() {
        let builder = SkeletonBuilder::new();
        let records = vec![
            RawRecord::Message {
                role: MessageRole::User,
                text: "a".to_string(),
                timestamp_us: Some(10),
            },
            RawRecord::Message {
                role: MessageRole::Assistant,
                text: "b".to_string(),
                timestamp_us: Some(20),
            },
            RawRecord::Message {
                role: MessageRole::User,
                text: "open".to_string(),
                timestamp_us: None,
            },
        ];
        let outcome = builder.build("t1", &records, &metadata("/ws", None));
        assert_eq!(outcome.skeleton.unwrap().end_time_us, Some(20));
    }
}
