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

//! Instruction extraction from launch markup.
//!
//! Agent messages that spawn sub-tasks embed one of two markup shapes:
//!
//! - a generic wrapped-task block: `<task>…</task>`
//! - a structured sub-task block:
//!   `<new_task><mode>code</mode><message>…</message></new_task>`
//!
//! Extraction is a pure function over text: no match yields an empty
//! sequence, and malformed or unterminated markup is skipped rather than
//! reported. The returned scanner is lazy and restartable (scanning the
//! same text twice yields the same sequence).

use regex::{CaptureMatches, Regex};
use serde::{Deserialize, Serialize};
use std::iter::Peekable;

/// Mode slugs recognized when stripping a leading mode token.
const KNOWN_MODES: &[&str] = &["code", "architect", "ask", "debug", "orchestrator"];

/// A normalized sub-task launch instruction extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Whitespace-collapsed, mode-stripped instruction text used for
    /// prefix matching against a child's first message.
    pub normalized_prefix: String,
    /// Explicit mode from structured markup, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// The raw payload as it appeared in the markup.
    pub raw_text: String,
}

/// Compiled extractor. Construct once, scan many messages.
#[derive(Debug, Clone)]
pub struct InstructionExtractor {
    generic: Regex,
    structured: Regex,
}

impl Default for InstructionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionExtractor {
    /// Compile the markup patterns.
    pub fn new() -> Self {
        // Non-greedy bodies; an unterminated block simply never matches.
        let generic = Regex::new(r"(?s)<task>(.*?)</task>").expect("static pattern");
        let structured = Regex::new(
            r"(?s)<new_task>\s*<mode>([^<]*)</mode>\s*<message>(.*?)</message>\s*</new_task>",
        )
        .expect("static pattern");
        Self { generic, structured }
    }

    /// Scan message text for launch instructions, in document order.
    pub fn scan<'r, 't>(&'r self, text: &'t str) -> InstructionScanner<'r, 't> {
        InstructionScanner {
            generic: self.generic.captures_iter(text).peekable(),
            structured: self.structured.captures_iter(text).peekable(),
        }
    }

    /// Convenience: collect all instructions from a message.
    pub fn extract_all(&self, text: &str) -> Vec<Instruction> {
        self.scan(text).collect()
    }
}

/// Lazy iterator over instructions found in one message.
///
/// Merges matches of both markup shapes by their byte offset so nested or
/// interleaved blocks come out in the order they appear.
pub struct InstructionScanner<'r, 't> {
    generic: Peekable<CaptureMatches<'r, 't>>,
    structured: Peekable<CaptureMatches<'r, 't>>,
}

impl Iterator for InstructionScanner<'_, '_> {
    type Item = Instruction;

    fn next(&mut self) -> Option<Instruction> {
        let generic_start = self.generic.peek().map(|c| c.get(0).map_or(usize::MAX, |m| m.start()));
        let structured_start = self
            .structured
            .peek()
            .map(|c| c.get(0).map_or(usize::MAX, |m| m.start()));

        match (generic_start, structured_start) {
            (None, None) => None,
            (Some(_), None) => self.generic.next().map(|c| {
                let raw = c.get(1).map_or("", |m| m.as_str());
                generic_instruction(raw)
            }),
            (None, Some(_)) => self.structured.next().map(|c| {
                let mode = c.get(1).map_or("", |m| m.as_str());
                let raw = c.get(2).map_or("", |m| m.as_str());
                structured_instruction(mode, raw)
            }),
            (Some(g), Some(s)) => {
                if g <= s {
                    self.generic.next().map(|c| {
                        let raw = c.get(1).map_or("", |m| m.as_str());
                        generic_instruction(raw)
                    })
                } else {
                    self.structured.next().map(|c| {
                        let mode = c.get(1).map_or("", |m| m.as_str());
                        let raw = c.get(2).map_or("", |m| m.as_str());
                        structured_instruction(mode, raw)
                    })
                }
            }
        }
    }
}

fn generic_instruction(raw: &str) -> Instruction {
    let collapsed = collapse_whitespace(raw);
    let normalized = strip_known_mode_token(&collapsed);
    Instruction {
        normalized_prefix: normalized,
        mode: None,
        raw_text: raw.to_string(),
    }
}

fn structured_instruction(mode: &str, raw: &str) -> Instruction {
    let mode = mode.trim();
    let collapsed = collapse_whitespace(raw);
    // Strip the mode token only when it duplicates the mode attribute.
    let normalized = strip_mode_token(&collapsed, mode);
    Instruction {
        normalized_prefix: normalized,
        mode: if mode.is_empty() {
            None
        } else {
            Some(mode.to_string())
        },
        raw_text: raw.to_string(),
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive comparison form used by prefix matching.
pub fn normalize_for_match(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

fn strip_known_mode_token(collapsed: &str) -> String {
    for mode in KNOWN_MODES {
        if let Some(stripped) = strip_token(collapsed, mode) {
            return stripped;
        }
    }
    collapsed.to_string()
}

fn strip_mode_token(collapsed: &str, mode: &str) -> String {
    if mode.is_empty() {
        return collapsed.to_string();
    }
    strip_token(collapsed, mode).unwrap_or_else(|| collapsed.to_string())
}

/// Strip a leading `token` (optionally followed by `:`) if it is a whole
/// word at the start of the text, case-insensitively.
fn strip_token(text: &str, token: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let token = token.to_lowercase();
    if !lower.starts_with(&token) || !text.is_char_boundary(token.len()) {
        return None;
    }
    let rest = &text[token.len()..];
    let (rest, had_colon) = match rest.strip_prefix(':') {
        Some(r) => (r, true),
        None => (rest, false),
    };
    if rest.is_empty() {
        return Some(String::new());
    }
    if !had_colon && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim_start().to_string())
}
