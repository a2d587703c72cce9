//! Configuration management for QuizForge.
//!
//! Settings load from a TOML file with serde defaults for every field, so a
//! missing or partial config file always yields a usable configuration.
//! Secrets (provider API key) come from the environment only, never from the
//! file on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "QUIZFORGE_API_KEY";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub extraction: ExtractionConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("quizforge.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for blob storage.
    pub root: PathBuf,
    /// Presigned upload URL lifetime in seconds.
    pub presign_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_data_dir().join("blobs"),
            presign_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Visibility timeout for document processing jobs, in seconds.
    /// Must exceed worst-case extraction time (minutes, not seconds).
    pub document_visibility_secs: i64,
    /// Visibility timeout for quiz generation jobs, in seconds.
    pub quiz_visibility_secs: i64,
    /// Deliveries before a message is routed to the dead-letter queue.
    pub max_receive_count: i64,
    /// Long-poll wait per receive call, in seconds.
    pub poll_wait_secs: u64,
    /// Messages processed per loop iteration.
    pub batch_size: usize,
    /// Width of the dedup time bucket, in seconds. Rapid duplicate enqueues
    /// of the same entity within one bucket collapse to a single message.
    pub dedup_window_secs: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            document_visibility_secs: 600,
            quiz_visibility_secs: 300,
            max_receive_count: 5,
            poll_wait_secs: 5,
            batch_size: 3,
            dedup_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Tesseract language setting.
    pub ocr_language: String,
    /// Rasterization DPI for the OCR fallback.
    pub ocr_dpi: u32,
    /// Timeout per external converter attempt, in seconds.
    pub converter_timeout_secs: u64,
    /// Output size cap per converter attempt, in bytes.
    pub converter_output_cap_bytes: usize,
    /// Quality gate: minimum extracted text length in characters.
    pub min_text_chars: usize,
    /// Quality gate: minimum word count.
    pub min_word_count: usize,
    /// Quality gate: minimum alphanumeric character ratio.
    pub min_alnum_ratio: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_language: "eng".to_string(),
            ocr_dpi: 300,
            converter_timeout_secs: 120,
            converter_output_cap_bytes: 20 * 1024 * 1024,
            min_text_chars: 50,
            min_word_count: 5,
            min_alnum_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_chars: usize,
    pub overlap_chars: usize,
    pub min_chunk_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: 4000,
            overlap_chars: 800,
            min_chunk_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding provider API.
    pub endpoint: String,
    pub model: String,
    /// Expected vector dimension for the configured model.
    pub dimension: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            batch_size: 100,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the generation provider API.
    pub endpoint: String,
    pub model: String,
    /// Cap on model output tokens.
    pub max_output_tokens: u32,
    /// Token budget for the assembled chunk context.
    pub context_token_budget: usize,
    /// Chunks selected per requested question.
    pub chunks_per_question: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_output_tokens: 8192,
            context_token_budget: 25_000,
            chunks_per_question: 3,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Ready quizzes allowed on the free tier (lifetime, counted from rows).
    pub free_quiz_limit: i64,
    /// Generations allowed per billing period on the paid tier.
    pub paid_period_limit: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_quiz_limit: 3,
            paid_period_limit: 100,
        }
    }
}

impl AppConfig {
    /// Load configuration from an explicit path, or the default location.
    ///
    /// A missing file is not an error: defaults apply.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            tracing::debug!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Provider API key from the environment.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
    }
}

/// Default data directory: `$XDG_DATA_HOME/quizforge` or a local fallback.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quizforge")
}

/// Default config file path: `$XDG_CONFIG_HOME/quizforge/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quizforge")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.chunking.chunk_size_chars, 4000);
        assert_eq!(config.chunking.overlap_chars, 800);
        assert_eq!(config.embedding.batch_size, 100);
        assert!(config.queue.document_visibility_secs >= 300);
        assert!(config.extraction.min_alnum_ratio > 0.0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [chunking]
            chunk_size_chars = 2000
        "#,
        )
        .unwrap();
        assert_eq!(parsed.chunking.chunk_size_chars, 2000);
        // Untouched sections keep their defaults
        assert_eq!(parsed.chunking.overlap_chars, 800);
        assert_eq!(parsed.embedding.dimension, 1536);
    }
}
