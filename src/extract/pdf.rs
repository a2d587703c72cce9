//! PDF extraction: native text layer first, OCR fallback behind the
//! quality gate.
//!
//! pdftotext is fast and accurate on born-digital PDFs but useless on scans;
//! the quality gate decides which kind we have. The OCR path rasterizes with
//! pdftoppm and runs tesseract page by page, skipping pages that fail so one
//! bad page never aborts the document.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use super::quality::QualityGate;
use super::{run_tool, tidy_text, ExtractionError, ExtractionOutcome, Result};
use crate::config::ExtractionConfig;
use crate::models::ExtractionMethod;

pub async fn extract(bytes: &[u8], config: &ExtractionConfig) -> Result<ExtractionOutcome> {
    // pdftotext wants a file; the TempDir cleans up on every exit path
    let scratch = TempDir::new()?;
    let pdf_path = scratch.path().join("input.pdf");
    tokio::fs::write(&pdf_path, bytes).await?;

    let timeout = Duration::from_secs(config.converter_timeout_secs);
    let page_count = pdf_page_count(&pdf_path, timeout, config).await;

    let native = run_tool(
        "pdftotext",
        &[
            OsStr::new("-layout"),
            OsStr::new("-enc"),
            OsStr::new("UTF-8"),
            pdf_path.as_os_str(),
            OsStr::new("-"),
        ],
        timeout,
        config.converter_output_cap_bytes,
    )
    .await?;

    let gate = QualityGate::from_config(config);
    if gate.accepts(&native) {
        return Ok(ExtractionOutcome {
            text: tidy_text(&native),
            method: ExtractionMethod::PdfText,
            page_count,
        });
    }

    tracing::info!(
        chars = native.trim().len(),
        "native text layer failed quality gate, falling back to OCR"
    );
    let text = ocr_pdf(&pdf_path, config).await?;
    Ok(ExtractionOutcome {
        text: tidy_text(&text),
        method: ExtractionMethod::PdfOcr,
        page_count,
    })
}

/// Page count via pdfinfo. Best-effort: a missing or failing pdfinfo only
/// costs us the metadata.
async fn pdf_page_count(
    pdf_path: &Path,
    timeout: Duration,
    config: &ExtractionConfig,
) -> Option<u32> {
    let output = run_tool(
        "pdfinfo",
        &[pdf_path.as_os_str()],
        timeout,
        config.converter_output_cap_bytes,
    )
    .await
    .ok()?;

    output
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
}

/// Rasterize the PDF and OCR each page.
///
/// Missing pdftoppm/tesseract surfaces as ToolNotFound so the operator sees
/// an actionable error instead of a silent empty extraction.
async fn ocr_pdf(pdf_path: &Path, config: &ExtractionConfig) -> Result<String> {
    let raster_dir = TempDir::new()?;
    let prefix = raster_dir.path().join("page");
    let dpi = config.ocr_dpi.to_string();

    run_tool(
        "pdftoppm",
        &[
            OsStr::new("-png"),
            OsStr::new("-r"),
            OsStr::new(&dpi),
            pdf_path.as_os_str(),
            prefix.as_os_str(),
        ],
        Duration::from_secs(config.converter_timeout_secs),
        config.converter_output_cap_bytes,
    )
    .await?;

    let mut images = page_images(raster_dir.path())?;
    images.sort();
    if images.is_empty() {
        return Err(ExtractionError::Failed(
            "pdftoppm produced no page images".to_string(),
        ));
    }

    let mut pages: Vec<String> = Vec::with_capacity(images.len());
    let mut failed_pages = 0_usize;

    for (i, image) in images.iter().enumerate() {
        match run_tesseract(image, config).await {
            Ok(text) => pages.push(text),
            // Tool absence aborts: retrying other pages cannot help
            Err(e @ ExtractionError::ToolNotFound(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(page = i + 1, error = %e, "OCR failed for page, skipping");
                failed_pages += 1;
            }
        }
    }

    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(ExtractionError::EmptyText(format!(
            "OCR produced no text across {} pages ({failed_pages} failed)",
            images.len()
        )));
    }

    Ok(pages.join("\n\n"))
}

async fn run_tesseract(image: &Path, config: &ExtractionConfig) -> Result<String> {
    run_tool(
        "tesseract",
        &[
            image.as_os_str(),
            OsStr::new("stdout"),
            OsStr::new("-l"),
            OsStr::new(&config.ocr_language),
        ],
        Duration::from_secs(config.converter_timeout_secs),
        config.converter_output_cap_bytes,
    )
    .await
}

fn page_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let images = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "png").unwrap_or(false))
        .collect();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_gate_thresholds_match_spec() {
        let gate = QualityGate::from_config(&ExtractionConfig::default());
        // Garbage text layer from a scanned PDF must fail the gate
        assert!(!gate.accepts("~~~ |||| ^^^ ####"));
        assert!(!gate.accepts("only twenty characters"));
        let real = "Mitochondria are the site of cellular respiration, producing ATP \
                    from glucose through oxidative phosphorylation in eukaryotic cells.";
        assert!(gate.accepts(real));
    }

    /// Drop a fake executable onto the lookup path so the whole
    /// rasterize-and-OCR pipeline can run without poppler or tesseract
    /// installed.
    #[cfg(unix)]
    fn install_fake_tool(dir: &Path, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn garbage_text_layer_routes_to_ocr() {
        let tools = TempDir::new().unwrap();
        // Text layer below every gate threshold, as a scanned PDF produces
        install_fake_tool(
            tools.path(),
            "pdftotext",
            "#!/bin/sh\nprintf '~~~ |||| ^^^'\n",
        );
        install_fake_tool(tools.path(), "pdfinfo", "#!/bin/sh\necho 'Pages: 2'\n");
        install_fake_tool(
            tools.path(),
            "pdftoppm",
            "#!/bin/sh\nfor a; do prefix=$a; done\n: > \"$prefix-1.png\"\n: > \"$prefix-2.png\"\n",
        );
        install_fake_tool(
            tools.path(),
            "tesseract",
            "#!/bin/sh\nprintf 'Recovered scanned text about cellular respiration.'\n",
        );

        let original = std::env::var("PATH").unwrap_or_default();
        std::env::set_var("PATH", format!("{}:{original}", tools.path().display()));
        let outcome = extract(b"%PDF-1.4 scanned lecture", &ExtractionConfig::default()).await;
        std::env::set_var("PATH", original);

        let outcome = outcome.unwrap();
        assert_eq!(outcome.method, ExtractionMethod::PdfOcr);
        assert_eq!(outcome.page_count, Some(2));
        assert!(outcome.text.contains("Recovered scanned text"));
    }

    #[test]
    fn page_images_filters_non_png() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page-01.png"), b"x").unwrap();
        std::fs::write(dir.path().join("page-02.png"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let mut images = page_images(dir.path()).unwrap();
        images.sort();
        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("page-01.png"));
    }
}
