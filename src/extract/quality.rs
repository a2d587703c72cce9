//! Quality gate for native PDF text extraction.
//!
//! Scanned PDFs often carry a garbage text layer (stray glyphs, ligature
//! soup). The gate decides whether pdftotext output is trustworthy or the
//! document must go through rasterization + OCR instead.

use crate::config::ExtractionConfig;

/// Heuristic acceptance test for extracted text.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    pub min_chars: usize,
    pub min_words: usize,
    pub min_alnum_ratio: f64,
}

impl QualityGate {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            min_chars: config.min_text_chars,
            min_words: config.min_word_count,
            min_alnum_ratio: config.min_alnum_ratio,
        }
    }

    /// Whether the text passes all three thresholds: length, word count,
    /// and alphanumeric ratio.
    pub fn accepts(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.min_chars {
            return false;
        }
        if trimmed.split_whitespace().count() < self.min_words {
            return false;
        }
        alnum_ratio(trimmed) >= self.min_alnum_ratio
    }
}

/// Fraction of non-whitespace characters that are alphanumeric.
pub fn alnum_ratio(text: &str) -> f64 {
    let mut total = 0_usize;
    let mut alnum = 0_usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if c.is_alphanumeric() {
            alnum += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    alnum as f64 / total as f64
}
