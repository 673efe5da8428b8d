//! Script-based language detection
//!
//! Scores a string against known Unicode script ranges and returns the
//! dominant language together with the full distribution. Detection is
//! deterministic and side-effect free.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Languages recognized by the detector
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Hi,
    Bn,
    Or,
    Ta,
    Te,
    Kn,
    Ml,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::En,
        Language::Hi,
        Language::Bn,
        Language::Or,
        Language::Ta,
        Language::Te,
        Language::Kn,
        Language::Ml,
    ];

    /// BCP-47 style tag
    pub fn tag(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Bn => "bn",
            Language::Or => "or",
            Language::Ta => "ta",
            Language::Te => "te",
            Language::Kn => "kn",
            Language::Ml => "ml",
        }
    }

    /// Unicode block backing this language; English is scored on ASCII letters
    pub fn script_range(self) -> Option<(u32, u32)> {
        match self {
            Language::En => None,
            Language::Hi => Some((0x0900, 0x097F)),
            Language::Bn => Some((0x0980, 0x09FF)),
            Language::Or => Some((0x0B00, 0x0B7F)),
            Language::Ta => Some((0x0B80, 0x0BFF)),
            Language::Te => Some((0x0C00, 0x0C7F)),
            Language::Kn => Some((0x0C80, 0x0CFF)),
            Language::Ml => Some((0x0D00, 0x0D7F)),
        }
    }

    /// Whether a character counts toward this language's score
    pub fn matches(self, c: char) -> bool {
        match self.script_range() {
            None => c.is_ascii_alphabetic(),
            Some((lo, hi)) => {
                let cp = c as u32;
                cp >= lo && cp <= hi
            }
        }
    }

    /// Tesseract language pack identifier
    pub fn tesseract_code(self) -> &'static str {
        match self {
            Language::En => "eng",
            Language::Hi => "hin",
            Language::Bn => "ben",
            Language::Or => "ori",
            Language::Ta => "tam",
            Language::Te => "tel",
            Language::Kn => "kan",
            Language::Ml => "mal",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Whether a character belongs to any supported script (English included)
pub fn is_supported_script(c: char) -> bool {
    Language::ALL.iter().any(|lang| lang.matches(c))
}

/// Outcome of language detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDetection {
    pub primary: Language,
    pub distribution: BTreeMap<Language, f32>,
}

/// Character-fraction language detector
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageDetector;

/// Minimum character fraction a language needs to become primary
const PRIMARY_THRESHOLD: f32 = 0.3;

impl LanguageDetector {
    pub fn new() -> Self {
        Self
    }

    /// Score `text` against every supported script
    ///
    /// The primary language is the one with the highest character fraction
    /// when that fraction reaches 0.3; otherwise English.
    pub fn detect(&self, text: &str) -> LanguageDetection {
        let total = text.chars().count();
        let mut distribution = BTreeMap::new();

        if total == 0 {
            distribution.insert(Language::En, 0.0);
            return LanguageDetection {
                primary: Language::En,
                distribution,
            };
        }

        for lang in Language::ALL {
            let matched = text.chars().filter(|c| lang.matches(*c)).count();
            distribution.insert(lang, matched as f32 / total as f32);
        }

        let primary = distribution
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .filter(|(_, fraction)| **fraction >= PRIMARY_THRESHOLD)
            .map(|(lang, _)| *lang)
            .unwrap_or(Language::En);

        LanguageDetection {
            primary,
            distribution,
        }
    }

    /// Convenience accessor returning only the primary language
    pub fn primary(&self, text: &str) -> Language {
        self.detect(text).primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_english() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("The quick brown fox jumps over the lazy dog.");
        assert_eq!(detection.primary, Language::En);
        assert!(detection.distribution[&Language::En] > 0.5);
    }

    #[test]
    fn test_detect_devanagari() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("नमस्ते दुनिया यह एक परीक्षण है");
        assert_eq!(detection.primary, Language::Hi);
    }

    #[test]
    fn test_detect_tamil() {
        let detector = LanguageDetector::new();
        assert_eq!(detector.primary("வணக்கம் உலகம் இது ஒரு சோதனை"), Language::Ta);
    }

    #[test]
    fn test_below_threshold_falls_back_to_english() {
        let detector = LanguageDetector::new();
        // Mostly digits and punctuation; no script reaches 30%
        let detection = detector.detect("1234567890 ?!,.;:()[] 42");
        assert_eq!(detection.primary, Language::En);
    }

    #[test]
    fn test_empty_input() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("");
        assert_eq!(detection.primary, Language::En);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let detector = LanguageDetector::new();
        let text = "हिंदी and English mixed ಕನ್ನಡ";
        let first = detector.detect(text);
        let second = detector.detect(text);
        assert_eq!(first.primary, second.primary);
        assert_eq!(first.distribution, second.distribution);
    }
}
