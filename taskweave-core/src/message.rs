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

//! Message types for reconstructed conversations.

use serde::{Deserialize, Serialize};

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions).
    System,
    /// User message (input).
    User,
    /// Assistant message (LLM output).
    Assistant,
    /// Tool result fed back into the conversation.
    Tool,
}

impl MessageRole {
    /// Get the role as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// A single message in a reconstructed conversation.
///
/// Timestamps are microseconds since epoch. A message with no reliable
/// timestamp carries `None`; it is never backfilled with wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Role of the message sender.
    pub role: MessageRole,
    /// Textual content of the message.
    pub text: String,
    /// Timestamp in microseconds since epoch, if the raw record carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_us: Option<u64>,
}

impl ConversationMessage {
    /// Create a new message.
    pub fn new(role: MessageRole, text: impl Into<String>, timestamp_us: Option<u64>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp_us,
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>, timestamp_us: Option<u64>) -> Self {
        Self::new(MessageRole::User, text, timestamp_us)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>, timestamp_us: Option<u64>) -> Self {
        Self::new(MessageRole::Assistant, text, timestamp_us)
    }

    /// Byte length of the message text.
    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_as_str() {
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Tool.as_str(), "tool");
    }

    #[test]
    fn test_message_creation() {
        let msg = ConversationMessage::user("Hello", Some(1_000));
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.timestamp_us, Some(1_000));
    }

    #[test]
    fn test_missing_timestamp_stays_none() {
        let msg = ConversationMessage::assistant("reply", None);
        assert_eq!(msg.timestamp_us, None);
    }
}
