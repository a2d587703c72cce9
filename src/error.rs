//! Top-level error taxonomy for the pipeline.
//!
//! Workers classify failures along one axis: retryable or not. Transient
//! provider failures leave the queue message in place so visibility-timeout
//! redelivery retries it; everything else drives the owning entity to
//! `failed` and consumes the message.

use thiserror::Error;

use crate::extract::ExtractionError;
use crate::llm::LlmError;
use crate::queue::QueueError;
use crate::repository::RepositoryError;
use crate::storage::StorageError;

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credentials or external tools. Requires operator action.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unsupported format, empty or corrupt content. Retrying with the same
    /// input cannot succeed.
    #[error("content error: {0}")]
    Content(String),

    /// Rate limit, timeout, or 5xx from a provider. Retryable with backoff.
    #[error("provider error: {0}")]
    Provider(String),

    /// Model output violated the required schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// Plan limit reached. Surfaced to the caller, never retried.
    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether redelivering the same job message can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Provider(_)
                | PipelineError::Repository(_)
                | PipelineError::Queue(_)
                | PipelineError::Storage(_)
                | PipelineError::Io(_)
        )
    }
}

impl From<ExtractionError> for PipelineError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::ToolNotFound(tool) => {
                PipelineError::Configuration(format!("external tool not found: {tool}"))
            }
            ExtractionError::UnsupportedFormat(mime) => {
                PipelineError::Content(format!("unsupported format: {mime}"))
            }
            ExtractionError::EmptyText(msg) | ExtractionError::Failed(msg) => {
                PipelineError::Content(msg)
            }
            ExtractionError::Io(e) => PipelineError::Io(e),
        }
    }
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey | LlmError::Auth(_) => {
                PipelineError::Configuration(err.to_string())
            }
            LlmError::RateLimited { .. } | LlmError::Connection(_) | LlmError::Server(_) => {
                PipelineError::Provider(err.to_string())
            }
            LlmError::Api(_) => PipelineError::Provider(err.to_string()),
            LlmError::Schema(_) | LlmError::Parse(_) => PipelineError::Validation(err.to_string()),
            LlmError::Dimension { .. } => PipelineError::Validation(err.to_string()),
        }
    }
}
