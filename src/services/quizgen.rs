//! Quiz generation: retrieval, prompt assembly, validation, persistence.
//!
//! Usage accounting is at-most-once: the counter increments strictly after
//! the question set commits. A redelivered job that finds its quiz already
//! `ready` returns success without generating or counting again.

use chrono::{DateTime, Utc};

use super::PipelineContext;
use crate::config::{AppConfig, QuotaConfig};
use crate::error::PipelineError;
use crate::models::{DocumentStatus, PlanTier, Question, QuestionType, Quiz, QuizStatus};
use crate::queue::{dedup_key, JobPayload, JobQueue};
use crate::repository::Repository;
use crate::retrieval;

/// Questions per auto-enqueued quiz.
pub const DEFAULT_QUESTION_COUNT: u32 = 8;

pub struct QuizGenerator {
    ctx: PipelineContext,
}

impl QuizGenerator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Generate and persist questions for one quiz job.
    pub async fn generate(&self, quiz_id: &str, question_count: u32) -> Result<(), PipelineError> {
        let quiz = self.ctx.repo.get_quiz(quiz_id)?;
        match quiz.status {
            QuizStatus::Ready => {
                // Redelivered after a commit that beat the message delete
                tracing::debug!(quiz_id, "quiz already ready, nothing to do");
                return Ok(());
            }
            QuizStatus::Failed | QuizStatus::Generating => {}
        }

        let chunks = self.ctx.repo.chunks_for_document(&quiz.document_id)?;
        if chunks.is_empty() {
            return Err(PipelineError::Content(format!(
                "document {} has no chunks",
                quiz.document_id
            )));
        }

        let query = self
            .ctx
            .embedder
            .embed(&[retrieval::QUERY_TEXT.to_string()])
            .await
            .map_err(PipelineError::from)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Provider("empty query embedding".to_string()))?;

        let generation = &self.ctx.config.generation;
        let selected = retrieval::select_chunks(
            &chunks,
            &query,
            question_count as usize,
            generation.chunks_per_question,
        );
        let context = retrieval::assemble_context(&selected, &query, generation.context_token_budget);
        tracing::debug!(
            quiz_id,
            selected = selected.len(),
            total = chunks.len(),
            "assembled generation context"
        );

        let drafts = self
            .ctx
            .generator
            .generate_questions(&quiz.title, &context, question_count as usize)
            .await
            .map_err(PipelineError::from)?;

        let questions: Vec<Question> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| Question {
                id: uuid::Uuid::new_v4().to_string(),
                quiz_id: quiz.id.clone(),
                question_index: i as u32,
                question_type: QuestionType::MultipleChoice,
                prompt: draft.prompt,
                choices: draft.choices,
                answer_index: draft.answer_index,
                explanation: draft.explanation,
                source_ref: draft.source_ref,
            })
            .collect();

        self.ctx
            .repo
            .insert_questions_and_ready(&quiz.id, &questions)?;
        tracing::info!(quiz_id, questions = questions.len(), "quiz ready");

        // Strictly after persistence, never at enqueue or row creation
        self.ctx
            .repo
            .record_completed_generation(&quiz.user_id, Utc::now())?;
        Ok(())
    }
}

/// Whether the user's plan permits starting another generation now.
///
/// Free tier: one quiz per document, up to a lifetime limit, both derived by
/// counting ready quiz rows. Paid tier: a per-period counter, regeneration
/// for the same document allowed.
pub fn quota_allows(
    repo: &Repository,
    quota: &QuotaConfig,
    user_id: &str,
    document_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, PipelineError> {
    match repo.plan_for_user(user_id)? {
        PlanTier::Free => {
            if repo.ready_quiz_count_for_document(document_id, user_id)? > 0 {
                return Ok(false);
            }
            let total = repo.ready_quiz_count_for_user(user_id)?;
            Ok(total < quota.free_quiz_limit)
        }
        PlanTier::Paid => {
            let used = repo.generation_count_in_period(user_id, now)?;
            Ok(used < quota.paid_period_limit)
        }
    }
}

/// Explicitly request quiz generation for a processed document.
///
/// Returns the created quiz, or `None` when a generation for the
/// (document, user) pair is already in flight. A plan-limit denial is a
/// `Quota` error, unlike the silent skip on the auto-enqueue path.
pub fn request_quiz(
    repo: &Repository,
    queue: &JobQueue,
    config: &AppConfig,
    document_id: &str,
    user_id: &str,
    question_count: u32,
) -> Result<Option<Quiz>, PipelineError> {
    let document = repo.get_document(document_id)?;
    if document.status != DocumentStatus::Ready {
        return Err(PipelineError::Content(format!(
            "document {document_id} is {}, not ready",
            document.status.as_str()
        )));
    }
    if !quota_allows(repo, &config.quota, user_id, document_id, Utc::now())? {
        return Err(PipelineError::Quota(format!(
            "plan limit reached for user {user_id}"
        )));
    }

    let quiz = Quiz::new(
        user_id.to_string(),
        document_id.to_string(),
        document.filename,
    );
    if !repo.try_create_generating(&quiz)? {
        return Ok(None);
    }

    let payload = JobPayload::quiz_generation(&quiz.id, document_id, question_count);
    queue.enqueue(&payload, &dedup_key(&quiz.id, config.queue.dedup_window_secs))?;
    tracing::info!(document_id, quiz_id = quiz.id, "quiz generation requested");
    Ok(Some(quiz))
}
