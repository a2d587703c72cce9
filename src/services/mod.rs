//! Pipeline orchestration: job handlers and worker loops.
//!
//! Two handlers, one per job type. The document processor drives
//! `uploaded -> processing -> ready | failed` and hands off to quiz
//! generation; the quiz generator drives `generating -> ready | failed`.
//! The worker owns message lifecycle: a message is deleted only after its
//! handler fully commits, or after a terminal failure has been recorded on
//! the owning entity.

mod processor;
mod quizgen;
mod worker;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{EmbeddingClient, GenerationClient};
use crate::queue::JobQueue;
use crate::repository::Repository;
use crate::storage::BlobStore;

pub use processor::DocumentProcessor;
pub use quizgen::{quota_allows, request_quiz, QuizGenerator, DEFAULT_QUESTION_COUNT};
pub use worker::Worker;

/// Shared handles for pipeline stages. Cheap to clone; every field is an Arc.
#[derive(Clone)]
pub struct PipelineContext {
    pub repo: Arc<Repository>,
    pub queue: Arc<JobQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub generator: Arc<dyn GenerationClient>,
    pub config: Arc<AppConfig>,
}
