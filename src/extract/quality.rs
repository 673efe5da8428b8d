//! Extraction quality gate for the OCR fallback
//!
//! Native PDF extraction can silently fail on scanned documents, producing
//! little or garbled text. The gate measures readable character count,
//! recognized-codepoint fraction, and OCR-artifact density to decide
//! whether a page set should be re-extracted with OCR.

use crate::language::is_supported_script;
use regex::Regex;
use std::sync::OnceLock;

/// Minimum non-whitespace characters for text to count as readable
const MIN_READABLE_CHARS: usize = 50;

/// Minimum fraction of recognized codepoints
const MIN_RECOGNIZED_FRACTION: f32 = 0.5;

/// Maximum tolerated artifact density
const MAX_ARTIFACT_DENSITY: f32 = 0.1;

/// Measurements backing the OCR decision
#[derive(Debug, Clone, Copy)]
pub struct QualityReport {
    pub readable_chars: usize,
    pub recognized_fraction: f32,
    pub artifact_density: f32,
}

impl QualityReport {
    /// Whether any trigger fires
    pub fn needs_ocr(&self) -> bool {
        self.readable_chars < MIN_READABLE_CHARS
            || self.recognized_fraction < MIN_RECOGNIZED_FRACTION
            || self.artifact_density > MAX_ARTIFACT_DENSITY
    }
}

fn artifact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\|{2,}|_{3,}|\.{4,}| {5,}").expect("valid artifact regex"))
}

/// Assess extracted text
pub fn assess(text: &str) -> QualityReport {
    let total = text.chars().count();
    let readable_chars = text.chars().filter(|c| !c.is_whitespace()).count();

    if readable_chars == 0 {
        return QualityReport {
            readable_chars: 0,
            recognized_fraction: 0.0,
            artifact_density: 0.0,
        };
    }

    let recognized = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .filter(|c| recognized_codepoint(*c))
        .count();
    let recognized_fraction = recognized as f32 / readable_chars as f32;

    let pattern_chars: usize = artifact_pattern()
        .find_iter(text)
        .map(|m| m.as_str().chars().count())
        .sum();
    let stray_chars = text
        .chars()
        .filter(|c| !c.is_whitespace() && !recognized_codepoint(*c))
        .count();
    let artifact_density = (pattern_chars + stray_chars) as f32 / total as f32;

    QualityReport {
        readable_chars,
        recognized_fraction,
        artifact_density,
    }
}

/// Convenience wrapper over [`assess`]
pub fn needs_ocr(text: &str) -> bool {
    assess(text).needs_ocr()
}

/// Supported script, ASCII punctuation, or digit
fn recognized_codepoint(c: char) -> bool {
    is_supported_script(c) || c.is_ascii_punctuation() || c.is_ascii_digit()
}
