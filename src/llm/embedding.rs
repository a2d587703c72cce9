//! Embedding client.
//!
//! Texts go to the provider in batches; each returned vector is checked
//! against the configured dimension before anything is persisted. A rate
//! limit gets exactly one retry per batch, then the error propagates so
//! queue redelivery handles the rest.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{classify_status, parse_retry_after, LlmError};
use crate::config::EmbeddingConfig;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Vector dimension this client produces.
    fn dimension(&self) -> usize;
}

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
    api_key: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig, api_key: Option<String>) -> Result<Self, LlmError> {
        let api_key = api_key.ok_or(LlmError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    async fn request_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: batch,
            })
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, retry_after));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        if parsed.data.len() != batch.len() {
            return Err(LlmError::Schema(format!(
                "sent {} texts, got {} embeddings",
                batch.len(),
                parsed.data.len()
            )));
        }

        // The provider may return data out of order; index restores input order
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for datum in data {
            if datum.embedding.len() != self.config.dimension {
                return Err(LlmError::Dimension {
                    expected: self.config.dimension,
                    got: datum.embedding.len(),
                });
            }
            vectors.push(datum.embedding);
        }
        Ok(vectors)
    }

    /// One retry on rate limit, honoring Retry-After when present.
    async fn batch_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        match self.request_batch(batch).await {
            Err(LlmError::RateLimited { retry_after }) => {
                let wait = retry_after.unwrap_or(2);
                tracing::warn!(wait_secs = wait, "embedding request rate limited, retrying");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                self.request_batch(batch).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            vectors.extend(self.batch_with_retry(batch).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(server_url: &str, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: server_url.to_string(),
            model: "test-embed".to_string(),
            dimension,
            batch_size: 100,
            timeout_secs: 5,
        }
    }

    fn client(server: &mockito::Server, dimension: usize) -> HttpEmbeddingClient {
        HttpEmbeddingClient::new(test_config(&server.url(), dimension), Some("sk-test".into()))
            .unwrap()
    }

    #[test]
    fn missing_key_is_rejected_at_construction() {
        let config = test_config("http://localhost", 4);
        assert!(matches!(
            HttpEmbeddingClient::new(config, None),
            Err(LlmError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn embed_restores_input_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(
                r#"{"data":[
                    {"index":1,"embedding":[1.0,1.0]},
                    {"index":0,"embedding":[0.0,0.0]}
                ]}"#,
            )
            .create_async()
            .await;

        let vectors = client(&server, 2)
            .embed(&["first".into(), "second".into()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(r#"{"data":[{"index":0,"embedding":[1.0,2.0,3.0]}]}"#)
            .create_async()
            .await;

        let err = client(&server, 4)
            .embed(&["text".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Dimension { expected: 4, got: 3 }));
    }

    #[tokio::test]
    async fn rate_limit_retries_once_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(429)
            .with_header("retry-after", "0")
            .with_body("slow down")
            .expect(2)
            .create_async()
            .await;

        let err = client(&server, 2)
            .embed(&["text".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { .. }));
        // One original attempt plus exactly one retry
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .with_status(401)
            .with_body("invalid key")
            .expect(1)
            .create_async()
            .await;

        let err = client(&server, 2)
            .embed(&["text".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        mock.assert_async().await;
    }
}
