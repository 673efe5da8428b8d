//! Normalization filter applied to extracted page text
//!
//! Native PDF extraction emits noisy codepoints: stray controls, the
//! replacement character, glyphs from unsupported scripts. Each page is
//! NFC-normalized, filtered down to printable ASCII, whitespace, and the
//! supported Indic scripts, then whitespace-collapsed per line.

use crate::language::is_supported_script;
use unicode_normalization::UnicodeNormalization;

/// Normalize one page of extracted text
pub fn normalize_page(text: &str) -> String {
    let composed: String = text.nfc().collect();

    let filtered: String = composed
        .chars()
        .filter(|c| *c != '\0' && *c != '\u{FFFD}')
        .filter(|c| keep_codepoint(*c))
        .collect();

    collapse_whitespace(&filtered)
}

/// Whether a codepoint survives the filter
fn keep_codepoint(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_graphic() || is_supported_script(c)
}

/// Collapse runs of intra-line whitespace and drop blank lines
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
