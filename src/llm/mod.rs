//! Provider clients for embeddings and question generation.
//!
//! Both clients speak an OpenAI-compatible HTTP API and are behind traits so
//! the pipeline stages can be exercised in tests without a network. Error
//! classification happens here: the worker only needs to know whether a
//! failure is worth redelivering.

mod embedding;
mod generation;
mod prompts;

use thiserror::Error;

pub use embedding::{EmbeddingClient, HttpEmbeddingClient};
pub use generation::{
    validate_questions, DraftQuestion, GenerationClient, HttpGenerationClient, RawQuestion,
};

use crate::config::API_KEY_ENV;

/// Errors from provider API calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider API key not set ({API_KEY_ENV})")]
    MissingApiKey,

    /// Credentials rejected. Retrying cannot help until the operator fixes
    /// the key.
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("provider rate limited (retry_after={retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("connection error: {0}")]
    Connection(String),

    /// 5xx from the provider. Transient.
    #[error("provider server error: {0}")]
    Server(String),

    /// Non-success status that is neither auth, rate limit, nor 5xx.
    #[error("provider API error: {0}")]
    Api(String),

    /// Response parsed but violated the required output schema.
    #[error("schema violation: {0}")]
    Schema(String),

    /// Response body was not valid JSON of the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },
}

/// Map a non-success HTTP status to the right error variant.
fn classify_status(
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> LlmError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited { retry_after };
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return LlmError::Auth(format!("HTTP {status}: {}", body.trim()));
    }
    if status.is_server_error() {
        return LlmError::Server(format!("HTTP {status}: {}", body.trim()));
    }
    LlmError::Api(format!("HTTP {status}: {}", body.trim()))
}

/// Parse a Retry-After header value (delta-seconds form only).
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "", Some(7)),
            LlmError::RateLimited {
                retry_after: Some(7)
            }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key", None),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "", None),
            LlmError::Server(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "", None),
            LlmError::Api(_)
        ));
    }

    #[test]
    fn retry_after_parses_delta_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(12));

        headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }
}
