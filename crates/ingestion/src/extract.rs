//! Document normalizer
//!
//! Turns raw upload bytes into UTF-8 plain text with page/section
//! boundaries preserved as metadata. Only the configured allow-list of
//! formats (PDF, DOCX) within the size cap is accepted; everything else
//! fails with `UnsupportedFormat` or `PayloadTooLarge` before any
//! parsing happens.

use std::io::Read;

use tracing::{debug, warn};

use presail_common::errors::{AppError, Result};
use presail_common::models::DocFormat;

/// Decompressed budget for a single ZIP entry inside an OOXML container
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// One page (PDF) or the whole body (DOCX) within the normalized text.
/// Offsets are character positions, matching the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// 1-based page number when the source format has pages
    pub page: Option<i32>,
    pub start_char: usize,
    pub end_char: usize,
}

/// Normalized output: plain text plus its section map
#[derive(Debug, Clone)]
pub struct NormalizedText {
    pub text: String,
    pub sections: Vec<Section>,
}

impl NormalizedText {
    /// Page range covering the character span `[start, end)`, for chunk
    /// metadata. `(None, None)` when the format has no pages.
    pub fn page_range(&self, start: usize, end: usize) -> (Option<i32>, Option<i32>) {
        let mut first = None;
        let mut last = None;
        for section in &self.sections {
            if section.start_char < end && section.end_char > start {
                if first.is_none() {
                    first = section.page;
                }
                last = section.page;
            }
        }
        (first, last)
    }
}

/// Check a declared extension and byte size against the accept policy
pub fn validate_upload(declared_extension: &str, size: usize, max_bytes: usize) -> Result<DocFormat> {
    let format = DocFormat::from_extension(declared_extension).ok_or_else(|| {
        AppError::UnsupportedFormat {
            extension: declared_extension.to_string(),
        }
    })?;
    if size > max_bytes {
        return Err(AppError::PayloadTooLarge {
            size,
            limit: max_bytes,
        });
    }
    Ok(format)
}

/// Normalize raw upload bytes into plain text with section metadata
pub fn normalize(bytes: &[u8], declared_extension: &str, max_bytes: usize) -> Result<NormalizedText> {
    let format = validate_upload(declared_extension, bytes.len(), max_bytes)?;
    let normalized = match format {
        DocFormat::Pdf => extract_pdf(bytes)?,
        DocFormat::Docx => extract_docx(bytes)?,
    };

    if normalized.text.trim().is_empty() {
        return Err(AppError::InvalidDocument {
            reason: "no text content could be extracted".into(),
        });
    }
    Ok(normalized)
}

fn extract_pdf(bytes: &[u8]) -> Result<NormalizedText> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| AppError::InvalidDocument {
        reason: format!("failed to parse PDF: {e}"),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    let mut sections = Vec::new();

    for (page_num, page_id) in pages {
        let page_text = match doc.get_page_content(page_id) {
            Ok(content) => clean_text(&extract_content_text(&content)),
            Err(e) => {
                warn!(page = page_num, error = %e, "Skipping unreadable page");
                continue;
            }
        };
        if page_text.is_empty() {
            continue;
        }

        let start_char = text.chars().count();
        text.push_str(&page_text);
        let end_char = text.chars().count();
        text.push('\n');

        sections.push(Section {
            page: Some(page_num as i32),
            start_char,
            end_char,
        });
    }

    Ok(NormalizedText { text, sections })
}

/// Walk a PDF content stream collecting text between BT/ET via the
/// Tj / TJ / ' / " showing operators.
fn extract_content_text(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;

    for line in content_str.lines() {
        let trimmed = line.trim();
        match trimmed {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                text.push(' ');
            }
            _ if in_text_block => {
                if let Some(shown) = extract_operator_text(trimmed) {
                    text.push_str(&shown);
                }
            }
            _ => {}
        }
    }
    text
}

fn extract_operator_text(line: &str) -> Option<String> {
    // (text) Tj and the quote variants
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        if end > start {
            return Some(decode_pdf_string(&line[start + 1..end]));
        }
        return None;
    }

    // [(text) kern (text)] TJ arrays
    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();
        for ch in line.chars() {
            match ch {
                '(' => in_paren = true,
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => current.push(ch),
                _ => {}
            }
        }
        if !result.is_empty() {
            return Some(result);
        }
    }
    None
}

fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }
    result
}

fn extract_docx(bytes: &[u8]) -> Result<NormalizedText> {
    let cursor = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|e| AppError::InvalidDocument {
        reason: format!("not a valid DOCX container: {e}"),
    })?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| AppError::InvalidDocument {
                reason: "word/document.xml not found in archive".into(),
            })?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| AppError::InvalidDocument {
                reason: format!("failed to read word/document.xml: {e}"),
            })?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(AppError::InvalidDocument {
                reason: "word/document.xml exceeds the decompressed size limit".into(),
            });
        }
    }

    let text = collect_docx_runs(&doc_xml)?;
    let text = clean_paragraphs(&text);
    let len = text.chars().count();

    Ok(NormalizedText {
        text,
        sections: vec![Section {
            page: None,
            start_char: 0,
            end_char: len,
        }],
    })
}

/// Collect `w:t` run text; paragraph ends become newlines
fn collect_docx_runs(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut out = String::new();
    let mut in_run_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_run_text => {
                out.push_str(e.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AppError::InvalidDocument {
                    reason: format!("malformed document XML: {e}"),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Collapse runs of spaces/tabs inside a line, keep paragraph breaks
fn clean_paragraphs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&collapsed);
    }
    out.trim_matches('\n').to_string()
}

/// Collapse all whitespace to single spaces and strip BOM artifacts
fn clean_text(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
