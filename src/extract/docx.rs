//! DOCX text extraction
//!
//! A `.docx` file is a zip archive; the main document body lives in
//! `word/document.xml`. Text runs (`w:t`) are concatenated, with paragraph
//! ends (`w:p`) mapped to newlines.

use crate::error::{ExtractionError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use std::path::Path;

/// Extract the main-document text from a DOCX file
pub async fn extract_text(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || read_document_xml(&path).map(|xml| flatten_runs(&xml)))
        .await
        .map_err(|e| ExtractionError::DocxParse(format!("extraction task failed: {}", e)))?
}

fn read_document_xml(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).map_err(|e| ExtractionError::FileRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ExtractionError::DocxParse(format!("not a zip archive: {}", e)))?;

    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::DocxParse(format!("missing word/document.xml: {}", e)))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::DocxParse(format!("unreadable document.xml: {}", e)))?;

    Ok(xml)
}

fn flatten_runs(xml: &str) -> String {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_run = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_run => {
                if let Ok(fragment) = t.unescape() {
                    text.push_str(&fragment);
                }
            }
            // w:tab and w:br appear as empty elements inside runs
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_simple_document() {
        let xml = r#"<?xml version="1.0"?>
            <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
              <w:body>
                <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second</w:t></w:r><w:r><w:t> paragraph.</w:t></w:r></w:p>
              </w:body>
            </w:document>"#;

        let text = flatten_runs(xml);
        assert_eq!(text, "First paragraph.\nSecond paragraph.");
    }

    #[test]
    fn test_ignores_text_outside_runs() {
        let xml = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:pPr>style noise</w:pPr><w:r><w:t>kept</w:t></w:r></w:p>
        </w:body></w:document>"#;

        assert_eq!(flatten_runs(xml), "kept");
    }

    #[test]
    fn test_breaks_and_tabs() {
        let xml = r#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>a</w:t><w:tab/><w:t>b</w:t><w:br/><w:t>c</w:t></w:r></w:p>
        </w:body></w:document>"#;

        assert_eq!(flatten_runs(xml), "a\tb\nc");
    }
}
