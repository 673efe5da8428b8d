//! Native PDF text extraction
//!
//! Pages are pulled in order through a bounded worker pool: batches of
//! [`PAGE_BATCH_SIZE`] pages, [`PAGE_WORKERS`] blocking workers per batch,
//! one batch in flight at a time. Page text goes through the normalization
//! filter before collation.

use crate::error::{ExtractionError, Result};
use crate::extract::normalize::normalize_page;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pages per extraction batch
pub const PAGE_BATCH_SIZE: usize = 5;

/// Concurrent workers within one batch
pub const PAGE_WORKERS: usize = 4;

/// Extract and normalize the text of every page, joined by blank lines
pub async fn extract_text(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || lopdf::Document::load(&owned))
        .await
        .map_err(|e| ExtractionError::PdfParse(format!("load task failed: {}", e)))?;

    match loaded {
        Ok(document) => extract_pages(Arc::new(document)).await,
        Err(e) => {
            warn!("lopdf failed to parse PDF, falling back to whole-file extraction: {}", e);
            extract_whole_file(path).await
        }
    }
}

/// Authoritative page count from the PDF page tree
pub async fn page_count(path: &Path) -> Option<usize> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || lopdf::Document::load(&owned))
        .await
        .ok()?
        .ok()
        .map(|document| document.get_pages().len())
}

async fn extract_pages(document: Arc<lopdf::Document>) -> Result<String> {
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    debug!("Extracting {} PDF pages", pages.len());

    let mut collated: Vec<String> = Vec::with_capacity(pages.len());

    for batch in pages.chunks(PAGE_BATCH_SIZE) {
        let extracted: Vec<String> = futures::stream::iter(batch.iter().copied().map(|page| {
            let document = Arc::clone(&document);
            async move {
                let raw = tokio::task::spawn_blocking(move || {
                    document.extract_text(&[page]).unwrap_or_else(|e| {
                        warn!("Page {} extraction failed: {}", page, e);
                        String::new()
                    })
                })
                .await
                .unwrap_or_default();

                normalize_page(&raw)
            }
        }))
        .buffered(PAGE_WORKERS)
        .collect()
        .await;

        collated.extend(extracted);
    }

    Ok(collated
        .into_iter()
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

async fn extract_whole_file(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
        .await
        .map_err(|e| ExtractionError::PdfParse(format!("extraction task failed: {}", e)))?
        .map_err(|e| ExtractionError::PdfParse(e.to_string()))?;

    Ok(normalize_page(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_an_extraction_error() {
        let result = extract_text(Path::new("/nonexistent/file.pdf")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_page_count_of_missing_file_is_none() {
        assert!(page_count(Path::new("/nonexistent/file.pdf")).await.is_none());
    }
}
