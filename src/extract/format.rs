//! Document format dispatch.
//!
//! One variant per supported container; every call site matches on the
//! variant instead of scattering MIME string comparisons.

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    /// Legacy binary Word format.
    Doc,
}

const MIME_PDF: &str = "application/pdf";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const MIME_DOC: &str = "application/msword";

impl DocumentFormat {
    /// Canonical MIME type for the format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => MIME_PDF,
            Self::Docx => MIME_DOCX,
            Self::Pptx => MIME_PPTX,
            Self::Doc => MIME_DOC,
        }
    }

    /// Resolve a format from the stored MIME type, falling back to the
    /// filename extension, then to content sniffing.
    pub fn detect(mime_type: &str, filename: &str, bytes: &[u8]) -> Option<Self> {
        let normalized = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_lowercase();

        Self::from_mime(&normalized)
            .or_else(|| Self::from_extension(filename))
            .or_else(|| Self::from_content(bytes))
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            MIME_PDF => Some(Self::Pdf),
            MIME_DOCX => Some(Self::Docx),
            MIME_PPTX => Some(Self::Pptx),
            MIME_DOC => Some(Self::Doc),
            _ => None,
        }
    }

    pub fn from_extension(filename: &str) -> Option<Self> {
        let ext = filename.rsplit_once('.')?.1.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "doc" => Some(Self::Doc),
            _ => None,
        }
    }

    /// Sniff the format from magic bytes.
    pub fn from_content(bytes: &[u8]) -> Option<Self> {
        let kind = infer::get(bytes)?;
        Self::from_mime(kind.mime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_from_mime() {
        assert_eq!(
            DocumentFormat::detect("application/pdf", "x.bin", b""),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::detect("application/pdf; charset=binary", "x.bin", b""),
            Some(DocumentFormat::Pdf)
        );
    }

    #[test]
    fn falls_back_to_extension() {
        assert_eq!(
            DocumentFormat::detect("application/octet-stream", "week3.PPTX", b""),
            Some(DocumentFormat::Pptx)
        );
        assert_eq!(
            DocumentFormat::detect("application/octet-stream", "notes.doc", b""),
            Some(DocumentFormat::Doc)
        );
    }

    #[test]
    fn sniffs_pdf_magic() {
        assert_eq!(
            DocumentFormat::detect("application/octet-stream", "mystery", b"%PDF-1.7 rest"),
            Some(DocumentFormat::Pdf)
        );
    }

    #[test]
    fn unknown_everything_is_none() {
        assert_eq!(
            DocumentFormat::detect("text/csv", "grades.csv", b"a,b,c"),
            None
        );
    }
}
