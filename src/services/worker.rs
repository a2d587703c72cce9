//! Worker loops: long-poll receive, dispatch, message lifecycle.
//!
//! One loop per job type, each processing a small batch sequentially per
//! iteration. Retryable failures leave the message in flight so visibility
//! timeout redelivers it; terminal failures mark the owning entity failed
//! and consume the message. Shutdown is coarse: loops stop between
//! iterations and in-flight work is abandoned to redelivery.

use std::time::Duration;

use tokio::sync::watch;

use super::processor::DocumentProcessor;
use super::quizgen::QuizGenerator;
use super::PipelineContext;
use crate::error::PipelineError;
use crate::models::{DocumentStatus, QuizStatus};
use crate::queue::{DeadLetter, JobMessage, JobPayload, JobType};

pub struct Worker {
    ctx: PipelineContext,
    processor: DocumentProcessor,
    quizgen: QuizGenerator,
}

impl Worker {
    pub fn new(ctx: PipelineContext) -> Self {
        let processor = DocumentProcessor::new(ctx.clone());
        let quizgen = QuizGenerator::new(ctx.clone());
        Self {
            ctx,
            processor,
            quizgen,
        }
    }

    /// Run both poll loops until ctrl-c.
    pub async fn run(&self) -> anyhow::Result<()> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                let _ = tx.send(true);
            }
        });

        tracing::info!("worker started");
        tokio::join!(
            self.poll_loop(JobType::DocumentProcessing, rx.clone()),
            self.poll_loop(JobType::QuizGeneration, rx),
        );
        tracing::info!("worker stopped");
        Ok(())
    }

    async fn poll_loop(&self, job_type: JobType, mut shutdown: watch::Receiver<bool>) {
        let queue_config = &self.ctx.config.queue;
        let wait = Duration::from_secs(queue_config.poll_wait_secs);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.changed() => break,
                r = self.ctx.queue.receive(job_type, queue_config.batch_size, wait) => r,
            };

            match received {
                Ok(batch) => {
                    for dead in batch.dead {
                        self.settle_dead(dead);
                    }
                    for message in batch.messages {
                        self.handle(message).await;
                    }
                }
                Err(e) => {
                    tracing::error!(job_type = job_type.as_str(), error = %e, "receive failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Process one message and settle its lifecycle.
    pub async fn handle(&self, message: JobMessage) {
        let payload = match message.payload() {
            Ok(payload) => payload,
            Err(e) => {
                // Undecodable messages would wedge the loop forever; drop them
                tracing::warn!(
                    job_id = message.job_id,
                    error = %e,
                    "undecodable payload, dropping message"
                );
                if let Err(e) = self.ctx.queue.delete(&message.receipt) {
                    tracing::error!(job_id = message.job_id, error = %e, "delete failed");
                }
                return;
            }
        };

        let result = match &payload {
            JobPayload::DocumentProcessing { document_id, .. } => {
                self.processor.process(document_id).await
            }
            JobPayload::QuizGeneration {
                quiz_id,
                question_count,
                ..
            } => self.quizgen.generate(quiz_id, *question_count).await,
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.ctx.queue.delete(&message.receipt) {
                    tracing::error!(job_id = message.job_id, error = %e, "delete failed");
                }
            }
            Err(error) if error.is_retryable() => {
                tracing::warn!(
                    job_id = message.job_id,
                    receive_count = message.receive_count,
                    error = %error,
                    "transient failure, leaving message for redelivery"
                );
                if let Err(e) = self
                    .ctx
                    .queue
                    .record_failure(&message.receipt, &error.to_string())
                {
                    tracing::error!(job_id = message.job_id, error = %e, "record_failure failed");
                }
            }
            Err(error) => {
                tracing::error!(job_id = message.job_id, error = %error, "terminal failure");
                self.mark_failed(&payload, &error);
                if let Err(e) = self.ctx.queue.delete(&message.receipt) {
                    tracing::error!(job_id = message.job_id, error = %e, "delete failed");
                }
            }
        }
    }

    /// A message exhausted its delivery budget and was dead-lettered. Mark
    /// the owning entity failed so the stall is visible outside the queue;
    /// a later redrive re-runs the job and can still succeed.
    pub fn settle_dead(&self, dead: DeadLetter) {
        match dead.payload() {
            Ok(payload) => {
                let error =
                    PipelineError::Provider("delivery budget exhausted, dead-lettered".to_string());
                tracing::error!(
                    job_id = dead.job_id,
                    entity_id = payload.entity_id(),
                    "message dead-lettered, marking entity failed"
                );
                self.mark_failed(&payload, &error);
            }
            Err(e) => {
                tracing::warn!(job_id = dead.job_id, error = %e, "dead letter with undecodable payload");
            }
        }
    }

    /// Record a terminal failure on the owning entity. A quiz failure never
    /// touches its document's status.
    fn mark_failed(&self, payload: &JobPayload, error: &PipelineError) {
        let outcome = match payload {
            JobPayload::DocumentProcessing { document_id, .. } => self
                .ctx
                .repo
                .set_document_status(document_id, DocumentStatus::Failed),
            JobPayload::QuizGeneration { quiz_id, .. } => {
                self.ctx.repo.set_quiz_status(quiz_id, QuizStatus::Failed)
            }
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, original = %error, "failed to record entity failure");
        }
    }
}
