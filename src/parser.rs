//! Multi-format text extraction.
//!
//! Dispatch is by file extension over the closed [`DocumentFormat`] set:
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `.pdf` | page text in page order (`pdf-extract`) |
//! | `.docx` | paragraph texts joined by `\n` |
//! | `.csv` | whitespace-aligned table, header first |
//! | `.pptx` | per slide in deck order, per shape: paragraphs joined by `\n`, then `\n` |
//! | `.txt`, `.md` | strict UTF-8 decode |
//!
//! Unknown extensions fail with [`RagError::UnsupportedFileType`]; text that is
//! empty after trimming fails with [`RagError::EmptyDocument`].
//!
//! Slide order comes from `<p:sldIdLst>` in `ppt/presentation.xml`; the
//! numeric `slideN.xml` order is used only when that part is absent. Only
//! top-level shapes contribute text (grouped shapes are skipped), and a
//! line break inside a paragraph (`<a:br/>`) becomes a vertical tab.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;

use crate::error::{RagError, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Default upper bound on the size of a source file.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Csv,
    Pptx,
    PlainText,
}

/// Format-level extraction failure, before a path is attached.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl DocumentFormat {
    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "csv" => Some(DocumentFormat::Csv),
            "pptx" => Some(DocumentFormat::Pptx),
            "txt" | "md" => Some(DocumentFormat::PlainText),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        DocumentFormat::from_extension(&ext).ok_or_else(|| RagError::UnsupportedFileType {
            path: path.to_path_buf(),
            extension: ext,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Csv => "csv",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::PlainText => "text",
        }
    }

    /// Extract plain text from the raw file bytes.
    pub fn extract(&self, bytes: &[u8]) -> std::result::Result<String, ExtractError> {
        match self {
            DocumentFormat::Pdf => extract_pdf(bytes),
            DocumentFormat::Docx => extract_docx(bytes),
            DocumentFormat::Csv => extract_csv(bytes),
            DocumentFormat::Pptx => extract_pptx(bytes),
            DocumentFormat::PlainText => Ok(String::from_utf8(bytes.to_vec())?),
        }
    }
}

/// Parse a file into plain text using the default size bound.
pub fn parse_file(path: &Path) -> Result<String> {
    parse_file_bounded(path, DEFAULT_MAX_FILE_BYTES)
}

/// Parse a file into plain text, rejecting files larger than `max_bytes`.
pub fn parse_file_bounded(path: &Path, max_bytes: u64) -> Result<String> {
    let format = DocumentFormat::from_path(path)?;

    let size = std::fs::metadata(path)?.len();
    if size > max_bytes {
        return Err(RagError::parse(
            path,
            format!("file is {} bytes, limit is {} bytes", size, max_bytes),
        ));
    }

    let bytes = std::fs::read(path)?;
    let text = format
        .extract(&bytes)
        .map_err(|e| RagError::parse(path, e))?;

    if text.trim().is_empty() {
        return Err(RagError::EmptyDocument {
            path: path.to_path_buf(),
        });
    }

    tracing::debug!(
        path = %path.display(),
        format = format.name(),
        chars = text.chars().count(),
        "parsed document"
    );
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> std::result::Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> std::result::Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let paragraphs = docx_paragraphs(&xml)?;
    Ok(paragraphs.join("\n"))
}

/// Text of each `<w:p>` in document order. Tabs and breaks are kept as `\t` and `\n`.
fn docx_paragraphs(xml: &[u8]) -> std::result::Result<Vec<String>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" => push_to(&mut current, "\t"),
                b"br" | b"cr" => push_to(&mut current, "\n"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                push_to(&mut current, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn push_to(target: &mut Option<String>, text: &str) {
    if let Some(s) = target.as_mut() {
        s.push_str(text);
    }
}

fn extract_pptx(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slide_names = match pptx_deck_order(&mut archive)? {
        Some(names) => names,
        None => pptx_numbered_slides(&archive),
    };

    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        for shape in pptx_shape_texts(&xml)? {
            out.push_str(&shape);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Slide part names in presentation order: `<p:sldIdLst>` in
/// `ppt/presentation.xml`, resolved through its relationships part.
/// `None` when either part is missing.
fn pptx_deck_order(archive: &mut Archive<'_>) -> std::result::Result<Option<Vec<String>>, ExtractError> {
    const PRESENTATION: &str = "ppt/presentation.xml";
    const RELS: &str = "ppt/_rels/presentation.xml.rels";
    if archive.index_for_name(PRESENTATION).is_none() || archive.index_for_name(RELS).is_none() {
        return Ok(None);
    }

    let presentation = read_zip_entry_bounded(archive, PRESENTATION, MAX_XML_ENTRY_BYTES)?;
    let rels = read_zip_entry_bounded(archive, RELS, MAX_XML_ENTRY_BYTES)?;

    let mut targets = std::collections::HashMap::new();
    for element in xml_elements(&rels, b"Relationship")? {
        if let (Some(id), Some(target)) = (attr(&element, b"Id"), attr(&element, b"Target")) {
            targets.insert(id, resolve_ppt_target(&target));
        }
    }

    let mut order = Vec::new();
    for element in xml_elements(&presentation, b"sldId")? {
        let rid = element
            .iter()
            .find(|(key, _)| key.ends_with(b":id"))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| ExtractError::Ooxml("sldId without r:id".into()))?;
        let part = targets
            .get(&rid)
            .ok_or_else(|| ExtractError::Ooxml(format!("unresolved slide relationship {}", rid)))?;
        order.push(part.clone());
    }
    Ok(Some(order))
}

/// `ppt/slides/slideN.xml` parts sorted by N.
fn pptx_numbered_slides(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Relationship targets are relative to `ppt/` unless absolute.
fn resolve_ppt_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => {
            let mut parts = vec!["ppt"];
            for segment in target.split('/') {
                match segment {
                    ".." => {
                        parts.pop();
                    }
                    "." | "" => {}
                    s => parts.push(s),
                }
            }
            parts.join("/")
        }
    }
}

type Attributes = Vec<(Vec<u8>, String)>;

/// Attributes of every element whose local name is `local`, in document order.
fn xml_elements(xml: &[u8], local: &[u8]) -> std::result::Result<Vec<Attributes>, ExtractError> {
    let mut found = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == local => {
                let mut attrs = Vec::new();
                for a in e.attributes() {
                    let a = a.map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    let value = a
                        .unescape_value()
                        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                    attrs.push((a.key.as_ref().to_vec(), value.into_owned()));
                }
                found.push(attrs);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(found)
}

fn attr(attrs: &Attributes, key: &[u8]) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k.as_slice() == key)
        .map(|(_, v)| v.clone())
}

/// Text of each top-level text-bearing `<p:sp>` on a slide, paragraphs
/// joined by `\n` and line breaks rendered as `\v`. Shapes inside a group
/// (`<p:grpSp>`) carry no text of their own and are skipped.
fn pptx_shape_texts(xml: &[u8]) -> std::result::Result<Vec<String>, ExtractError> {
    let mut shapes = Vec::new();
    let mut group_depth = 0usize;
    let mut in_shape = false;
    let mut has_text_body = false;
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"grpSp" => group_depth += 1,
                b"sp" if group_depth == 0 => {
                    in_shape = true;
                    has_text_body = false;
                    paragraphs.clear();
                }
                b"txBody" if in_shape => has_text_body = true,
                b"p" if has_text_body => current = Some(String::new()),
                b"t" if has_text_body => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" if has_text_body => paragraphs.push(String::new()),
                b"br" => push_to(&mut current, "\u{000B}"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                push_to(&mut current, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"grpSp" => group_depth = group_depth.saturating_sub(1),
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                b"sp" if in_shape => {
                    if has_text_body {
                        shapes.push(paragraphs.join("\n"));
                    }
                    in_shape = false;
                    has_text_body = false;
                    paragraphs.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

/// Render a CSV file as an aligned table: header row first, every column
/// right-aligned to its widest cell, one space between columns.
fn extract_csv(bytes: &[u8]) -> std::result::Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        rows.push(record.iter().map(|f| f.trim().to_string()).collect());
    }

    let columns = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, cell)| format!("{:>width$}", cell, width = widths[i]))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    Ok(lines.join("\n"))
}
