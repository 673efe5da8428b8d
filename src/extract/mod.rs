//! Document text extraction
//!
//! Converts an uploaded file into one normalized UTF-8 string, dispatching
//! on the file extension. PDF extraction runs page-parallel and falls back
//! to OCR when the extracted text fails the quality gate.

pub mod docx;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod quality;

pub use ocr::{OcrConfig, OcrEngine, OcrOutcome, OcrPage};
pub use quality::QualityReport;

use crate::error::{ExtractionError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Extension-dispatched text extractor
#[derive(Debug, Clone)]
pub struct TextExtractor {
    ocr: Option<OcrEngine>,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor {
    /// Extractor with the default OCR fallback
    pub fn new() -> Self {
        Self {
            ocr: Some(OcrEngine::default()),
        }
    }

    /// Extractor with OCR disabled; low-quality PDFs keep their native text
    pub fn without_ocr() -> Self {
        Self { ocr: None }
    }

    /// Extractor with a custom OCR engine
    pub fn with_ocr_engine(engine: OcrEngine) -> Self {
        Self { ocr: Some(engine) }
    }

    /// Extract text from `path`, treating `extension` as the format tag
    pub async fn extract(&self, path: &Path, extension: &str) -> Result<String> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => self.extract_pdf(path).await,
            "docx" => docx::extract_text(path).await,
            "html" | "htm" => {
                let raw = read_text(path).await?;
                Ok(strip_html(&raw))
            }
            "json" => {
                let raw = read_text(path).await?;
                Ok(stabilize_json(&raw))
            }
            // txt, md, and anything else text-like is read verbatim
            _ => read_text(path).await,
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<String> {
        let native = match pdf::extract_text(path).await {
            Ok(text) => text,
            Err(native_err) => {
                // Unparseable PDFs are often scans; OCR is the only option left
                let Some(engine) = &self.ocr else {
                    return Err(native_err);
                };
                warn!("Native PDF extraction failed, attempting OCR: {}", native_err);
                let count = pdf::page_count(path).await;
                return match engine.recognize_pdf(path, count).await {
                    Ok(outcome) => Ok(outcome.text),
                    Err(ocr_err) => {
                        warn!("OCR fallback also failed: {}", ocr_err);
                        Err(native_err)
                    }
                };
            }
        };

        if quality::needs_ocr(&native) {
            if let Some(engine) = &self.ocr {
                debug!("Extraction quality below threshold, re-extracting with OCR");
                let count = pdf::page_count(path).await;
                match engine.recognize_pdf(path, count).await {
                    Ok(outcome) if outcome.text.chars().count() > native.chars().count() => {
                        return Ok(outcome.text);
                    }
                    Ok(_) => debug!("OCR output not longer than native text, keeping native"),
                    Err(e) => warn!("OCR failed, keeping native extraction: {}", e),
                }
            }
        }

        Ok(native)
    }
}

async fn read_text(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ExtractionError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    String::from_utf8(bytes)
        .map_err(|_| ExtractionError::InvalidUtf8(path.display().to_string()).into())
}

fn script_blocks() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid block regex")
    })
}

fn html_tags() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

/// Strip tags and collapse whitespace
fn strip_html(html: &str) -> String {
    let without_blocks = script_blocks().replace_all(html, " ");
    let without_tags = html_tags().replace_all(&without_blocks, " ");

    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Re-serialize JSON pretty-printed to stabilize whitespace
fn stabilize_json(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(e) => {
            warn!("Invalid JSON document, keeping raw text: {}", e);
            raw.to_string()
        }
    }
}
