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

//! Text chunking for embedding.
//!
//! Large skeletons are split into overlapping chunks so each embedding
//! covers a coherent slice. Sizes are in characters (~4 per token for
//! English text); chunk ends snap back to sentence boundaries when
//! possible.

use serde::{Deserialize, Serialize};

/// Chunking tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    pub max_chars: usize,
    /// Characters of overlap between consecutive chunks.
    pub overlap_chars: usize,
    /// Snap chunk ends back to sentence boundaries.
    pub respect_boundaries: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1024,
            overlap_chars: 128,
            respect_boundaries: true,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chars == 0 {
            return Err("max_chars must be non-zero".to_string());
        }
        if self.overlap_chars >= self.max_chars {
            return Err(format!(
                "overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            ));
        }
        Ok(())
    }
}

/// One chunk of a task's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
}

/// Character-budget chunker.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Split text into chunks. Empty text yields no chunks; text within
    /// the budget yields exactly one.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.config.max_chars {
            return vec![Chunk {
                text: text.to_string(),
                index: 0,
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;
        while start < chars.len() {
            let hard_end = (start + self.config.max_chars).min(chars.len());
            let mut end = hard_end;
            if self.config.respect_boundaries && hard_end < chars.len() {
                if let Some(boundary) = snap_to_boundary(&chars[start..hard_end]) {
                    end = start + boundary;
                }
            }

            chunks.push(Chunk {
                text: chars[start..end].iter().collect(),
                index,
            });

            if end >= chars.len() {
                break;
            }
            start = end.saturating_sub(self.config.overlap_chars).max(start + 1);
            index += 1;
        }

        chunks
    }
}

/// Index just past the last sentence boundary in the slice, if any.
fn snap_to_boundary(chars: &[char]) -> Option<usize> {
    for (i, &c) in chars.iter().enumerate().rev() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            // Boundary must leave a non-trivial chunk behind.
            if i > chars.len() / 4 {
                return Some(i + 1);
            }
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("a short message.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "a short message.");
    }

    #[test]
    fn test_long_text_overlapping_chunks() {
        let chunker = Chunker::new(ChunkingConfig {
            max_chars: 100,
            overlap_chars: 20,
            respect_boundaries: false,
        })
        .unwrap();
        let text = "x".repeat(350);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.text.chars().count() <= 100);
        }
        // Overlap means the chunks jointly cover more than the text.
        let covered: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert!(covered > 350);
    }

    #[test]
    fn test_boundary_snapping() {
        let chunker = Chunker::new(ChunkingConfig {
            max_chars: 50,
            overlap_chars: 0,
            respect_boundaries: true,
        })
        .unwrap();
        let text = "First sentence here. Second sentence follows and keeps going for a while.";
        let chunks = chunker.chunk(text);
        assert!(chunks[0].text.ends_with('.'));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Chunker::new(ChunkingConfig {
            max_chars: 10,
            overlap_chars: 10,
            respect_boundaries: true,
        });
        assert!(result.is_err());
    }
}
