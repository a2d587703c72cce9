//! Text extraction from lecture documents.
//!
//! Dispatches on document format: PDF through pdftotext with a quality-gated
//! OCR fallback, DOCX/PPTX through their ZIP-of-XML containers, legacy DOC
//! through a cascade of external converters. All scratch files live in
//! `TempDir`s so every exit path cleans up after itself.

mod doc;
mod format;
mod ooxml;
mod pdf;
mod quality;

use thiserror::Error;

use crate::config::ExtractionConfig;
use crate::models::ExtractionMethod;

pub use format::DocumentFormat;
pub use quality::QualityGate;

/// Errors that can occur during text extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Format the pipeline does not handle. Content error, not retryable.
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// Required external binary missing. Configuration error, operator-fixable.
    #[error("external tool not found: {0}")]
    ToolNotFound(String),

    /// Extraction produced no usable text.
    #[error("no text extracted: {0}")]
    EmptyText(String),

    /// The extractor ran but failed on this content.
    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractionError>;

/// Result of text extraction.
#[derive(Debug)]
pub struct ExtractionOutcome {
    /// Extracted text content, in document order.
    pub text: String,
    /// Which extractor path produced the text.
    pub method: ExtractionMethod,
    /// Page count for PDFs, slide count for PPTX.
    pub page_count: Option<u32>,
}

/// Format-dispatching extraction engine.
pub struct ExtractionEngine {
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract text from document bytes.
    ///
    /// The format is resolved from the stored MIME type, the filename
    /// extension, and content sniffing, in that order.
    pub async fn extract(
        &self,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<ExtractionOutcome> {
        let format = DocumentFormat::detect(mime_type, filename, bytes)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(mime_type.to_string()))?;

        let outcome = match format {
            DocumentFormat::Pdf => pdf::extract(bytes, &self.config).await?,
            DocumentFormat::Docx => ooxml::extract_docx(bytes)?,
            DocumentFormat::Pptx => ooxml::extract_pptx(bytes)?,
            DocumentFormat::Doc => doc::extract(bytes, &self.config).await?,
        };

        if outcome.text.trim().is_empty() {
            return Err(ExtractionError::EmptyText(format!(
                "{} produced no text",
                outcome.method.as_str()
            )));
        }

        Ok(outcome)
    }
}

/// Report availability of the external tools extraction depends on.
pub fn check_tools() -> Vec<(&'static str, bool)> {
    ["pdftotext", "pdfinfo", "pdftoppm", "tesseract", "antiword", "soffice"]
        .iter()
        .map(|tool| (*tool, which::which(tool).is_ok()))
        .collect()
}

/// Run an external tool with a timeout and an output-size cap, returning
/// stdout on success.
pub(crate) async fn run_tool(
    program: &str,
    args: &[&std::ffi::OsStr],
    timeout: std::time::Duration,
    output_cap_bytes: usize,
) -> Result<String> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractionError::ToolNotFound(program.to_string()));
        }
        Err(e) => return Err(ExtractionError::Io(e)),
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ExtractionError::Failed(format!(
                "{program} timed out after {}s",
                timeout.as_secs()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::Failed(format!(
            "{program} failed: {}",
            stderr.trim()
        )));
    }

    let mut stdout = output.stdout;
    if stdout.len() > output_cap_bytes {
        tracing::warn!(program, cap = output_cap_bytes, "tool output truncated at cap");
        stdout.truncate(output_cap_bytes);
    }
    Ok(String::from_utf8_lossy(&stdout).to_string())
}

/// Collapse runs of 3+ newlines left behind by structural markers.
pub(crate) fn tidy_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out.trim().to_string()
}
