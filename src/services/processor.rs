//! Document processing: extraction, summary, chunking, embedding.
//!
//! Every stage is re-derivable so at-least-once delivery is safe: an
//! existing extraction is reused instead of re-extracting, and the chunk
//! set is written only if none exists for the extraction yet. The document
//! reaches `ready` only after chunks and embeddings are persisted.

use chrono::Utc;

use super::quizgen::{self, DEFAULT_QUESTION_COUNT};
use super::PipelineContext;
use crate::chunker::{self, ChunkOptions};
use crate::error::PipelineError;
use crate::extract::{DocumentFormat, ExtractionEngine};
use crate::models::{Chunk, Document, DocumentStatus, Extraction, Quiz};
use crate::queue::{dedup_key, JobPayload};

pub struct DocumentProcessor {
    ctx: PipelineContext,
    engine: ExtractionEngine,
}

impl DocumentProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        let engine = ExtractionEngine::new(ctx.config.extraction.clone());
        Self { ctx, engine }
    }

    /// Process one document job to completion.
    ///
    /// On success the document is `ready` and, quota permitting, a quiz
    /// generation job has been enqueued. Errors propagate to the worker,
    /// which decides between redelivery and marking the document failed.
    pub async fn process(&self, document_id: &str) -> Result<(), PipelineError> {
        let document = self.ctx.repo.get_document(document_id)?;
        self.ctx
            .repo
            .set_document_status(document_id, DocumentStatus::Processing)?;

        let bytes = self.ctx.blobs.get(&document.blob_key).await?;
        let mime_type = self.resniff_mime(&document, &bytes)?;

        let extraction = self.extract_or_reuse(&document, &bytes, &mime_type).await?;
        self.summarize(&document, &extraction.text).await;
        self.chunk_and_embed(&document, &extraction).await?;

        self.ctx
            .repo
            .set_document_status(document_id, DocumentStatus::Ready)?;
        tracing::info!(document_id, "document ready");

        self.maybe_enqueue_quiz(&document).await?;
        Ok(())
    }

    /// Re-sniff the uploaded bytes; browsers routinely mislabel uploads.
    /// Returns the MIME type to trust for format dispatch.
    fn resniff_mime(&self, document: &Document, bytes: &[u8]) -> Result<String, PipelineError> {
        let Some(sniffed) = DocumentFormat::from_content(bytes) else {
            return Ok(document.mime_type.clone());
        };
        let mime = sniffed.mime_type();
        if mime != document.mime_type {
            tracing::info!(
                document_id = document.id,
                stored = document.mime_type,
                sniffed = mime,
                "correcting MIME type from content"
            );
            self.ctx.repo.set_document_mime(&document.id, mime)?;
        }
        Ok(mime.to_string())
    }

    async fn extract_or_reuse(
        &self,
        document: &Document,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<Extraction, PipelineError> {
        if let Some(existing) = self.ctx.repo.latest_extraction(&document.id)? {
            tracing::debug!(
                document_id = document.id,
                extraction_id = existing.id,
                "reusing existing extraction"
            );
            return Ok(existing);
        }

        let outcome = self
            .engine
            .extract(bytes, mime_type, &document.filename)
            .await?;
        tracing::info!(
            document_id = document.id,
            method = outcome.method.as_str(),
            chars = outcome.text.len(),
            "extracted text"
        );

        if let Some(pages) = outcome.page_count {
            self.ctx.repo.set_document_page_count(&document.id, pages)?;
        }

        let extraction = Extraction::new(document.id.clone(), outcome.text, outcome.method);
        self.ctx.repo.insert_extraction(&extraction)?;
        Ok(extraction)
    }

    /// Best-effort summary: failure is logged and the summary stays null.
    async fn summarize(&self, document: &Document, text: &str) {
        if document.summary.is_some() {
            return;
        }

        // Bound the summary input the same way generation context is bounded
        let char_cap = self.ctx.config.generation.context_token_budget * 4;
        let mut end = text.len().min(char_cap);
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }

        match self
            .ctx
            .generator
            .generate_summary(&document.filename, &text[..end])
            .await
        {
            Ok(sections) => {
                if let Err(e) = self.ctx.repo.set_document_summary(&document.id, &sections) {
                    tracing::warn!(document_id = document.id, error = %e, "failed to store summary");
                }
            }
            Err(e) => {
                tracing::warn!(document_id = document.id, error = %e, "summary generation failed");
            }
        }
    }

    async fn chunk_and_embed(
        &self,
        document: &Document,
        extraction: &Extraction,
    ) -> Result<(), PipelineError> {
        if self.ctx.repo.chunks_exist_for_extraction(&extraction.id)? {
            tracing::debug!(
                document_id = document.id,
                extraction_id = extraction.id,
                "chunks already persisted, skipping"
            );
            return Ok(());
        }

        let options = ChunkOptions::from(&self.ctx.config.chunking);
        let pieces = chunker::chunk(&extraction.text, &options);
        if pieces.is_empty() {
            return Err(PipelineError::Content(
                "chunker produced no chunks".to_string(),
            ));
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let vectors = self.ctx.embedder.embed(&texts).await.map_err(PipelineError::from)?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, embedding)| Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: document.id.clone(),
                extraction_id: extraction.id.clone(),
                chunk_index: piece.index,
                text: piece.text,
                embedding,
                token_estimate: piece.token_estimate,
            })
            .collect();

        tracing::info!(document_id = document.id, chunks = chunks.len(), "persisting chunk set");
        self.ctx.repo.insert_chunks(&chunks)?;
        Ok(())
    }

    /// Evaluate quota and, if allowed, create the quiz row and enqueue
    /// generation. A quota denial is not an error: the document is ready
    /// either way.
    async fn maybe_enqueue_quiz(&self, document: &Document) -> Result<(), PipelineError> {
        let now = Utc::now();
        if !quizgen::quota_allows(
            &self.ctx.repo,
            &self.ctx.config.quota,
            &document.user_id,
            &document.id,
            now,
        )? {
            tracing::info!(
                document_id = document.id,
                user_id = document.user_id,
                "quota disallows auto quiz generation"
            );
            return Ok(());
        }

        let quiz = Quiz::new(
            document.user_id.clone(),
            document.id.clone(),
            document.filename.clone(),
        );
        if !self.ctx.repo.try_create_generating(&quiz)? {
            // Another generation is already running for this pair
            return Ok(());
        }

        let payload = JobPayload::quiz_generation(&quiz.id, &document.id, DEFAULT_QUESTION_COUNT);
        let dedup = dedup_key(&quiz.id, self.ctx.config.queue.dedup_window_secs);
        self.ctx.queue.enqueue(&payload, &dedup)?;
        tracing::info!(document_id = document.id, quiz_id = quiz.id, "quiz generation enqueued");
        Ok(())
    }
}
