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

//! Workspace path normalization.
//!
//! Workspaces recorded on different platforms refer to the same directory
//! with different casing and separators. Equality is defined over the
//! normalized form only, and normalization happens exactly once, when a
//! skeleton is constructed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A workspace identifier normalized for cross-platform equality.
///
/// Equivalence rules:
/// - case folded (Windows paths are case-insensitive),
/// - backslashes unified to forward slashes,
/// - runs of separators collapsed to one,
/// - trailing slash stripped (except for a bare root),
/// - extended-length prefix (`\\?\`) stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceKey(String);

impl WorkspaceKey {
    /// Normalize a raw workspace path into a key.
    pub fn new(raw: &str) -> Self {
        Self(normalize_workspace_path(raw))
    }

    /// The normalized form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Apply the documented equivalence rules to a raw path string.
pub fn normalize_workspace_path(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("\\\\?\\")
        .or_else(|| trimmed.strip_prefix("//?/"))
        .unwrap_or(trimmed);

    let mut out = String::with_capacity(stripped.len());
    let mut last_was_sep = false;
    for ch in stripped.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }
        for folded in ch.to_lowercase() {
            out.push(folded);
        }
    }

    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }

    out
}
