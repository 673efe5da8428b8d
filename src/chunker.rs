//! Text chunking with overlap for context preservation
//!
//! Splits extracted document text into overlapping windows, preferring to
//! break at sentence terminators, then paragraph breaks, then spaces.
//! Offsets are half-open character offsets into the input string.

use crate::error::{RagError, Result};
use crate::language::{Language, LanguageDetector};
use serde::{Deserialize, Serialize};

/// Default window size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive windows
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// One chunk of a source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    /// Trimmed window content
    pub content: String,

    /// Character offset of the window start in the source text
    pub start_char: usize,

    /// Character offset one past the window end
    pub end_char: usize,

    /// Language detected for this chunk; may differ from the document's
    pub language: Language,
}

/// Sliding-window chunker
#[derive(Debug, Clone)]
pub struct TextChunker {
    size: usize,
    overlap: usize,
    detector: LanguageDetector,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
            .expect("default chunk parameters are valid")
    }
}

impl TextChunker {
    /// Create a chunker; `overlap` must be smaller than `size`
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::Configuration(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(RagError::Configuration(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                overlap, size
            )));
        }
        Ok(Self {
            size,
            overlap,
            detector: LanguageDetector::new(),
        })
    }

    /// Split `text` into overlapping chunks
    ///
    /// Empty input yields exactly one empty chunk. Each emitted window spans
    /// at most `size` characters and every iteration advances the window
    /// start, so the loop terminates in O(len) steps.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        if len == 0 {
            return vec![TextChunk {
                content: String::new(),
                start_char: 0,
                end_char: 0,
                language: Language::En,
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < len {
            let window_end = (start + self.size).min(len);
            let end = if window_end == len {
                len
            } else {
                self.pick_boundary(&chars, start, window_end)
            };

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    content: trimmed.to_string(),
                    start_char: start,
                    end_char: end,
                    language: self.detector.primary(trimmed),
                });
            }

            // Overlap the next window; fall back to a clean break when the
            // overlap would revisit the current start.
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// Choose a break position inside `(start, window_end]`
    ///
    /// Preference order: last sentence terminator in the upper half of the
    /// window, last paragraph break past 30% of the window, last space in
    /// the upper half, the raw window end.
    fn pick_boundary(&self, chars: &[char], start: usize, window_end: usize) -> usize {
        let half = (start + self.size / 2).min(window_end);

        for p in (half..window_end).rev() {
            if matches!(chars[p], '.' | '?' | '!') {
                return self.guard(start, window_end, p + 1);
            }
        }

        let para_floor = (start + self.size * 3 / 10).min(window_end);
        for p in (para_floor..window_end.saturating_sub(1)).rev() {
            if chars[p] == '\n' && chars[p + 1] == '\n' {
                return self.guard(start, window_end, p);
            }
        }

        for p in (half..window_end).rev() {
            if chars[p].is_whitespace() {
                return self.guard(start, window_end, p);
            }
        }

        window_end
    }

    // A boundary at or before the window start would stall the loop.
    fn guard(&self, start: usize, window_end: usize, boundary: usize) -> usize {
        if boundary > start {
            boundary
        } else {
            window_end
        }
    }
}
