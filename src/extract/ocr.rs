//! OCR fallback for scanned or low-quality PDFs
//!
//! Pages are rasterized with `pdftoppm` at 300 DPI, optionally enhanced,
//! and recognized with the `tesseract` CLI using the union language pack
//! (English plus the supported Indic scripts) in single-block page
//! segmentation mode. At most [`MAX_PARALLEL_PAGES`] pages are in flight.
//!
//! OCR is best-effort: callers treat any error here as "keep the original
//! extraction".

use crate::error::{ExtractionError, Result};
use crate::language::{Language, LanguageDetector};
use futures::StreamExt;
use image::imageops::FilterType;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound on concurrently processed pages
pub const MAX_PARALLEL_PAGES: usize = 5;

/// Rasterization resolution
const RENDER_DPI: u16 = 300;

/// Pages shorter than this are resampled before recognition
const MIN_ENHANCED_HEIGHT: u32 = 2000;

/// OCR engine configuration
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Language packs passed to tesseract
    pub languages: Vec<Language>,

    /// Rasterization DPI
    pub dpi: u16,

    /// Tesseract page segmentation mode
    pub page_seg_mode: u8,

    /// Enhance page images before recognition
    pub enhance: bool,

    /// Scratch directory for rendered pages and tesseract output
    pub temp_dir: PathBuf,

    /// Per-command timeout
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: Language::ALL.to_vec(),
            dpi: RENDER_DPI,
            page_seg_mode: 6,
            enhance: true,
            temp_dir: std::env::temp_dir().join("ragmill_ocr"),
            timeout: Duration::from_secs(45),
        }
    }
}

/// Per-page recognition result
#[derive(Debug, Clone, Serialize)]
pub struct OcrPage {
    pub page: usize,
    /// Mean word confidence in `[0, 1]`
    pub confidence: f32,
    pub text: String,
}

/// Full-document recognition result
#[derive(Debug, Clone, Serialize)]
pub struct OcrOutcome {
    pub text: String,
    pub pages: Vec<OcrPage>,
    pub language: Language,
    pub tesseract_version: Option<String>,
}

/// Command-line driven OCR engine
#[derive(Debug, Clone)]
pub struct OcrEngine {
    config: OcrConfig,
}

impl Default for OcrEngine {
    fn default() -> Self {
        Self::new(OcrConfig::default())
    }
}

impl OcrEngine {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    /// Whether both `tesseract` and `pdftoppm` can be spawned
    pub async fn available() -> bool {
        let tesseract = Command::new("tesseract").arg("--version").output().await;
        let pdftoppm = Command::new("pdftoppm").arg("-v").output().await;
        tesseract.is_ok() && pdftoppm.is_ok()
    }

    /// First line of `tesseract --version`
    pub async fn tesseract_version() -> Option<String> {
        let output = Command::new("tesseract").arg("--version").output().await.ok()?;
        // tesseract prints its banner on stderr
        let banner = if output.stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).to_string()
        } else {
            String::from_utf8_lossy(&output.stderr).to_string()
        };
        banner.lines().next().map(|line| line.trim().to_string())
    }

    /// Recognize every page of a PDF
    ///
    /// `page_count` comes from the PDF structure when the caller has it;
    /// without it, pages are rendered one by one until the rasterizer
    /// produces nothing.
    pub async fn recognize_pdf(&self, path: &Path, page_count: Option<usize>) -> Result<OcrOutcome> {
        let session_dir = self.config.temp_dir.join(format!("ocr_{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&session_dir)
            .await
            .map_err(|e| ExtractionError::Ocr(format!("cannot create temp dir: {}", e)))?;

        let outcome = match page_count {
            Some(count) => self.recognize_known_pages(path, count, &session_dir).await,
            None => self.recognize_by_probing(path, &session_dir).await,
        };

        if let Err(e) = tokio::fs::remove_dir_all(&session_dir).await {
            warn!("Failed to clean OCR temp dir: {}", e);
        }

        let mut pages = outcome?;
        pages.sort_by_key(|page| page.page);

        let text = pages
            .iter()
            .map(|page| page.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let language = LanguageDetector::new().primary(&text);
        let tesseract_version = Self::tesseract_version().await;

        info!(
            "OCR recognized {} pages, {} characters",
            pages.len(),
            text.chars().count()
        );

        Ok(OcrOutcome {
            text,
            pages,
            language,
            tesseract_version,
        })
    }

    async fn recognize_known_pages(
        &self,
        path: &Path,
        count: usize,
        session_dir: &Path,
    ) -> Result<Vec<OcrPage>> {
        debug!("OCR over {} known pages", count);

        let pages: Vec<OcrPage> = futures::stream::iter((1..=count).map(|page| {
            let engine = self.clone();
            let pdf = path.to_path_buf();
            let dir = session_dir.to_path_buf();
            async move {
                match engine.recognize_page(&pdf, page, &dir).await {
                    Ok(recognized) => Some(recognized),
                    Err(e) => {
                        warn!("OCR failed on page {}: {}", page, e);
                        None
                    }
                }
            }
        }))
        .buffered(MAX_PARALLEL_PAGES)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();

        Ok(pages)
    }

    // Without an authoritative count, render sequentially until the
    // rasterizer stops producing pages.
    async fn recognize_by_probing(&self, path: &Path, session_dir: &Path) -> Result<Vec<OcrPage>> {
        let mut pages = Vec::new();
        let mut page = 1usize;

        loop {
            match self.render_page(path, page, session_dir).await {
                Ok(Some(image)) => {
                    match self.recognize_image(&image, page, session_dir).await {
                        Ok(recognized) => pages.push(recognized),
                        Err(e) => warn!("OCR failed on page {}: {}", page, e),
                    }
                    page += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    if pages.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }

        Ok(pages)
    }

    async fn recognize_page(&self, pdf: &Path, page: usize, session_dir: &Path) -> Result<OcrPage> {
        let image = self
            .render_page(pdf, page, session_dir)
            .await?
            .ok_or_else(|| ExtractionError::Ocr(format!("page {} produced no image", page)))?;

        self.recognize_image(&image, page, session_dir).await
    }

    /// Rasterize one page; `Ok(None)` when the page does not exist
    async fn render_page(
        &self,
        pdf: &Path,
        page: usize,
        session_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let prefix = session_dir.join(format!("page_{}", page));
        let page_arg = page.to_string();

        let render = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(self.config.dpi.to_string())
            .arg("-f")
            .arg(&page_arg)
            .arg("-l")
            .arg(&page_arg)
            .arg(pdf)
            .arg(&prefix)
            .output();

        let output = tokio::time::timeout(self.config.timeout, render)
            .await
            .map_err(|_| ExtractionError::Ocr("pdftoppm timed out".to_string()))?
            .map_err(|e| ExtractionError::Ocr(format!("pdftoppm failed to start: {}", e)))?;

        if !output.status.success() {
            return Err(ExtractionError::Ocr(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ))
            .into());
        }

        // pdftoppm zero-pads the page suffix, so locate the file by prefix
        let stem = format!("page_{}-", page);
        let mut entries = tokio::fs::read_dir(session_dir)
            .await
            .map_err(|e| ExtractionError::Ocr(e.to_string()))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&stem) && name.ends_with(".png") {
                return Ok(Some(entry.path()));
            }
        }

        Ok(None)
    }

    async fn recognize_image(
        &self,
        image_path: &Path,
        page: usize,
        session_dir: &Path,
    ) -> Result<OcrPage> {
        if self.config.enhance {
            let source = image_path.to_path_buf();
            if let Err(e) = tokio::task::spawn_blocking(move || enhance_image(&source))
                .await
                .unwrap_or_else(|e| Err(ExtractionError::Ocr(e.to_string()).into()))
            {
                warn!("Image enhancement failed on page {}: {}", page, e);
            }
        }

        let out_base = session_dir.join(format!("text_{}", page));
        let languages = self
            .config
            .languages
            .iter()
            .map(|lang| lang.tesseract_code())
            .collect::<Vec<_>>()
            .join("+");

        let recognize = Command::new("tesseract")
            .arg(image_path)
            .arg(&out_base)
            .arg("-l")
            .arg(&languages)
            .arg("--psm")
            .arg(self.config.page_seg_mode.to_string())
            .arg("txt")
            .arg("tsv")
            .output();

        let output = tokio::time::timeout(self.config.timeout, recognize)
            .await
            .map_err(|_| ExtractionError::Ocr("tesseract timed out".to_string()))?
            .map_err(|e| ExtractionError::Ocr(format!("tesseract failed to start: {}", e)))?;

        if !output.status.success() {
            return Err(ExtractionError::Ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ))
            .into());
        }

        let raw = tokio::fs::read_to_string(out_base.with_extension("txt"))
            .await
            .map_err(|e| ExtractionError::Ocr(format!("missing tesseract output: {}", e)))?;

        let confidence = match tokio::fs::read_to_string(out_base.with_extension("tsv")).await {
            Ok(tsv) => mean_confidence(&tsv),
            Err(_) => 0.0,
        };

        Ok(OcrPage {
            page,
            confidence,
            text: postprocess(&raw),
        })
    }
}

/// Grayscale, resample, gamma-correct, contrast-stretch, and sharpen a page
fn enhance_image(path: &Path) -> Result<()> {
    let image = image::open(path).map_err(|e| ExtractionError::Ocr(e.to_string()))?;
    let mut gray = image.into_luma8();

    let (width, height) = gray.dimensions();
    if height < MIN_ENHANCED_HEIGHT {
        let scale = MIN_ENHANCED_HEIGHT as f32 / height as f32;
        let new_width = (width as f32 * scale).round() as u32;
        gray = image::imageops::resize(&gray, new_width, MIN_ENHANCED_HEIGHT, FilterType::Lanczos3);
    }

    // Gamma 1.1 lifts midtones that scanners tend to crush
    for pixel in gray.pixels_mut() {
        let normalized = pixel.0[0] as f32 / 255.0;
        pixel.0[0] = (normalized.powf(1.0 / 1.1) * 255.0).round() as u8;
    }

    // Contrast stretch to the full range
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max > min {
        let range = (max - min) as f32;
        for pixel in gray.pixels_mut() {
            let stretched = ((pixel.0[0] - min) as f32 / range * 255.0).round() as u8;
            pixel.0[0] = stretched;
        }
    }

    let sharpened = image::DynamicImage::ImageLuma8(gray)
        .brighten(8)
        .unsharpen(1.2, 2);

    sharpened
        .save(path)
        .map_err(|e| ExtractionError::Ocr(e.to_string()))?;

    Ok(())
}

/// Mean word confidence from tesseract's TSV output, scaled to `[0, 1]`
fn mean_confidence(tsv: &str) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 {
            continue;
        }
        if let Ok(conf) = columns[10].parse::<f32>() {
            if conf >= 0.0 {
                sum += conf;
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        (sum / count as f32) / 100.0
    }
}

fn pipe_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\|{2,}|_{3,}").expect("valid run regex"))
}

fn ellipsis_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.{4,}").expect("valid ellipsis regex"))
}

fn spaced_punctuation() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+([.,;:!?])").expect("valid punctuation regex"))
}

/// Clean common OCR artifacts out of recognized text
fn postprocess(text: &str) -> String {
    let stripped = pipe_runs().replace_all(text, " ");
    let elided = ellipsis_runs().replace_all(&stripped, "...");
    let spaced = spaced_punctuation().replace_all(&elided, "$1");

    spaced
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postprocess_strips_artifact_runs() {
        let cleaned = postprocess("hello ||| world ____ done");
        assert_eq!(cleaned, "hello world done");
    }

    #[test]
    fn test_postprocess_normalizes_ellipses() {
        assert_eq!(postprocess("wait......... what"), "wait... what");
    }

    #[test]
    fn test_postprocess_fixes_punctuation_spacing() {
        assert_eq!(postprocess("Hello , world ."), "Hello, world.");
    }

    #[test]
    fn test_mean_confidence_ignores_structural_rows() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t90\thello\n\
                   5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t80\tworld\n";
        let confidence = mean_confidence(tsv);
        assert!((confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_mean_confidence_empty() {
        assert_eq!(mean_confidence("header\n"), 0.0);
    }
}
