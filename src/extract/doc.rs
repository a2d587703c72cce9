//! Legacy binary DOC extraction through a converter cascade.
//!
//! antiword is tried first (fast, text-only), then soffice in headless
//! conversion mode. Converters that are not installed are skipped; if none
//! is available the error names both so the operator knows what to install.

use std::ffi::OsStr;
use std::time::Duration;

use tempfile::TempDir;

use super::{run_tool, tidy_text, ExtractionError, ExtractionOutcome, Result};
use crate::config::ExtractionConfig;
use crate::models::ExtractionMethod;

pub async fn extract(bytes: &[u8], config: &ExtractionConfig) -> Result<ExtractionOutcome> {
    let scratch = TempDir::new()?;
    let doc_path = scratch.path().join("input.doc");
    tokio::fs::write(&doc_path, bytes).await?;

    let mut last_error: Option<ExtractionError> = None;
    let mut any_available = false;

    for converter in [Converter::Antiword, Converter::Soffice] {
        if which::which(converter.binary()).is_err() {
            continue;
        }
        any_available = true;

        match converter.run(&doc_path, scratch.path(), config).await {
            Ok(text) if !text.trim().is_empty() => {
                return Ok(ExtractionOutcome {
                    text: tidy_text(&text),
                    method: converter.method(),
                    page_count: None,
                });
            }
            Ok(_) => {
                tracing::debug!(converter = converter.binary(), "converter produced no text");
                last_error = Some(ExtractionError::EmptyText(format!(
                    "{} produced no text",
                    converter.binary()
                )));
            }
            Err(e) => {
                tracing::warn!(converter = converter.binary(), error = %e, "converter failed");
                last_error = Some(e);
            }
        }
    }

    if !any_available {
        return Err(ExtractionError::ToolNotFound(
            "no DOC converter installed (need antiword or soffice)".to_string(),
        ));
    }

    Err(last_error.unwrap_or_else(|| {
        ExtractionError::Failed("all DOC converters failed".to_string())
    }))
}

#[derive(Clone, Copy)]
enum Converter {
    Antiword,
    Soffice,
}

impl Converter {
    fn binary(&self) -> &'static str {
        match self {
            Self::Antiword => "antiword",
            Self::Soffice => "soffice",
        }
    }

    fn method(&self) -> ExtractionMethod {
        match self {
            Self::Antiword => ExtractionMethod::DocAntiword,
            Self::Soffice => ExtractionMethod::DocSoffice,
        }
    }

    async fn run(
        &self,
        doc_path: &std::path::Path,
        scratch: &std::path::Path,
        config: &ExtractionConfig,
    ) -> Result<String> {
        let timeout = Duration::from_secs(config.converter_timeout_secs);
        match self {
            Self::Antiword => {
                run_tool(
                    "antiword",
                    &[doc_path.as_os_str()],
                    timeout,
                    config.converter_output_cap_bytes,
                )
                .await
            }
            Self::Soffice => {
                // soffice writes <stem>.txt next to --outdir rather than to
                // stdout, so convert into the scratch dir and read the file
                run_tool(
                    "soffice",
                    &[
                        OsStr::new("--headless"),
                        OsStr::new("--convert-to"),
                        OsStr::new("txt:Text"),
                        OsStr::new("--outdir"),
                        scratch.as_os_str(),
                        doc_path.as_os_str(),
                    ],
                    timeout,
                    config.converter_output_cap_bytes,
                )
                .await?;

                let txt_path = scratch.join("input.txt");
                let mut text = tokio::fs::read_to_string(&txt_path).await.map_err(|e| {
                    ExtractionError::Failed(format!(
                        "soffice reported success but produced no output: {e}"
                    ))
                })?;
                if text.len() > config.converter_output_cap_bytes {
                    tracing::warn!(
                        cap = config.converter_output_cap_bytes,
                        "soffice output truncated at cap"
                    );
                    let mut cut = config.converter_output_cap_bytes;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                Ok(text)
            }
        }
    }
}
