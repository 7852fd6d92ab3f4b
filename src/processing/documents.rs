//! Multi-format document ingestion.
//!
//! Formats are chosen by file-name suffix. Unsupported files are dropped from the batch, and a
//! file whose extraction errors, panics, or stalls still yields a [`ParsedDocument`] with empty
//! text so that one bad upload never blocks the rest.

use super::types::{ParsedDocument, UploadedFile};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors raised by a single extractor.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Neither PDF backend could read the file.
    #[error("Failed to extract PDF text: {0}")]
    Pdf(String),
    /// The Word document could not be read.
    #[error("Failed to read DOCX document: {0}")]
    Docx(String),
    /// The email message could not be parsed.
    #[error("Failed to parse email message: {0}")]
    Email(String),
}

/// Evidence formats accepted by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word-processing document.
    Docx,
    /// RFC 5322 email message.
    Eml,
}

impl DocumentFormat {
    /// Detect the format from a file name suffix, case-insensitively.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, extension) = name.rsplit_once('.')?;
        match extension.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "eml" => Some(Self::Eml),
            _ => None,
        }
    }
}

/// Parse a batch of uploads into documents, preserving submission order.
///
/// Extraction runs on the blocking pool, one task per file, each bounded by `timeout`.
pub async fn parse_documents(files: Vec<UploadedFile>, timeout: Duration) -> Vec<ParsedDocument> {
    let mut pending = Vec::with_capacity(files.len());
    for UploadedFile { name, bytes } in files {
        let Some(format) = DocumentFormat::from_file_name(&name) else {
            tracing::debug!(file = %name, "Skipping unsupported document format");
            continue;
        };
        let handle = tokio::task::spawn_blocking(move || extract_text(format, &bytes));
        pending.push((name, format, handle));
    }

    let mut documents = Vec::with_capacity(pending.len());
    for (name, format, handle) in pending {
        let text = await_extraction(&name, format, handle, timeout).await;
        tracing::debug!(file = %name, ?format, chars = text.chars().count(), "Document parsed");
        documents.push(ParsedDocument { name, text });
    }
    documents
}

/// Blocking tasks cannot be cancelled; a timed-out extractor runs on until it returns and its
/// result is discarded.
async fn await_extraction(
    name: &str,
    format: DocumentFormat,
    handle: JoinHandle<Result<String, ExtractionError>>,
    timeout: Duration,
) -> String {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(text))) => text,
        Ok(Ok(Err(error))) => {
            tracing::warn!(file = %name, ?format, error = %error, "Document extraction failed");
            String::new()
        }
        Ok(Err(join_error)) => {
            tracing::warn!(
                file = %name,
                ?format,
                error = %join_error,
                "Document extractor panicked"
            );
            String::new()
        }
        Err(_) => {
            tracing::warn!(
                file = %name,
                ?format,
                timeout_ms = timeout.as_millis() as u64,
                "Document extraction timed out"
            );
            String::new()
        }
    }
}

/// Extract normalized text from `bytes` in the given format.
pub fn extract_text(format: DocumentFormat, bytes: &[u8]) -> Result<String, ExtractionError> {
    let raw = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Eml => extract_eml(bytes)?,
    };
    Ok(normalize_text(&raw))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => {
            tracing::debug!("pdf-extract returned no text; trying lopdf");
            extract_pdf_fallback(bytes)
        }
        Err(error) => {
            tracing::debug!(error = %error, "pdf-extract failed; trying lopdf");
            extract_pdf_fallback(bytes)
        }
    }
}

fn extract_pdf_fallback(bytes: &[u8]) -> Result<String, ExtractionError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|error| ExtractionError::Pdf(error.to_string()))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    document
        .extract_text(&pages)
        .map_err(|error| ExtractionError::Pdf(error.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let docx =
        docx_rs::read_docx(bytes).map_err(|error| ExtractionError::Docx(error.to_string()))?;

    let mut text = String::new();
    for child in docx.document.children {
        match child {
            docx_rs::DocumentChild::Paragraph(paragraph) => {
                for child in paragraph.children {
                    if let docx_rs::ParagraphChild::Run(run) = child {
                        for child in run.children {
                            match child {
                                docx_rs::RunChild::Text(t) => text.push_str(&t.text),
                                docx_rs::RunChild::Tab(_) => text.push('\t'),
                                docx_rs::RunChild::Break(_) => text.push('\n'),
                                _ => {}
                            }
                        }
                    }
                }
                text.push('\n');
            }
            docx_rs::DocumentChild::Table(_) => {
                tracing::debug!("Skipping DOCX table content");
            }
            _ => {}
        }
    }
    Ok(text)
}

fn extract_eml(bytes: &[u8]) -> Result<String, ExtractionError> {
    let message = mail_parser::MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| ExtractionError::Email("not a valid RFC 5322 message".into()))?;

    let bodies: Vec<String> = message
        .text_bodies()
        .filter_map(|part| match &part.body {
            mail_parser::PartType::Text(text) => Some(text.to_string()),
            _ => None,
        })
        .collect();
    Ok(bodies.join("\n"))
}

/// Normalize extracted text: drop NULs, unify line endings, trim line ends, and collapse long
/// runs of blank lines.
pub(crate) fn normalize_text(raw: &str) -> String {
    let cleaned = raw.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");
    let mut output = String::with_capacity(cleaned.len());
    let mut blank_run = 0;

    for line in cleaned.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        output.push_str(line);
        output.push('\n');
    }

    output.trim().to_string()
}
