//! Document, extraction, and chunk models.
//!
//! A Document is created on upload completion and mutated only by the
//! pipeline. Extractions are append-only: a retry reuses the existing
//! extraction rather than re-extracting. Chunks for one extraction are
//! written atomically as a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One section of a structured document summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySection {
    pub title: String,
    pub points: Vec<String>,
}

/// An uploaded lecture document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: String,
    /// Owning user reference (auth is an external concern).
    pub user_id: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// Key of the uploaded bytes in the blob store.
    pub blob_key: String,
    /// MIME type reported at upload; may be corrected by content sniffing.
    pub mime_type: String,
    pub status: DocumentStatus,
    /// Page count for PDFs, slide count for PPTX.
    pub page_count: Option<u32>,
    /// Structured summary, generated best-effort; stays None on failure.
    pub summary: Option<Vec<SummarySection>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document in the `uploaded` state.
    pub fn new(
        id: String,
        user_id: String,
        filename: String,
        blob_key: String,
        mime_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            filename,
            blob_key,
            mime_type,
            status: DocumentStatus::Uploaded,
            page_count: None,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compute the content-addressed blob key for uploaded bytes.
    pub fn blob_key_for(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }
}

/// Which extractor path produced the text. Recorded for quality audits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// PDF native text layer via pdftotext.
    PdfText,
    /// PDF rasterized and OCR'd page by page.
    PdfOcr,
    /// DOCX XML part walk.
    DocxXml,
    /// PPTX slide XML walk.
    PptxXml,
    /// Legacy DOC via antiword.
    DocAntiword,
    /// Legacy DOC via soffice headless conversion.
    DocSoffice,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PdfText => "pdf_text",
            Self::PdfOcr => "pdf_ocr",
            Self::DocxXml => "docx_xml",
            Self::PptxXml => "pptx_xml",
            Self::DocAntiword => "doc_antiword",
            Self::DocSoffice => "doc_soffice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf_text" => Some(Self::PdfText),
            "pdf_ocr" => Some(Self::PdfOcr),
            "docx_xml" => Some(Self::DocxXml),
            "pptx_xml" => Some(Self::PptxXml),
            "doc_antiword" => Some(Self::DocAntiword),
            "doc_soffice" => Some(Self::DocSoffice),
            _ => None,
        }
    }
}

/// Raw extracted text for a document. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub method: ExtractionMethod,
    pub created_at: DateTime<Utc>,
}

impl Extraction {
    pub fn new(document_id: String, text: String, method: ExtractionMethod) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id,
            text,
            method,
            created_at: Utc::now(),
        }
    }
}

/// A bounded slice of extracted text with its embedding vector.
///
/// `chunk_index` is zero-based, monotonic, and gap-free within a document;
/// ordering by it reconstructs document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub extraction_id: String,
    pub chunk_index: u32,
    pub text: String,
    /// Fixed-dimension embedding for the configured model.
    pub embedding: Vec<f32>,
    pub token_estimate: u32,
}

impl Chunk {
    /// Encode the embedding as little-endian f32 bytes for storage.
    pub fn embedding_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.embedding.len() * 4);
        for value in &self.embedding {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    /// Decode an embedding from little-endian f32 bytes.
    pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}
