//! Domain models for the document-to-quiz pipeline.

mod document;
mod quiz;
mod usage;

pub use document::{Chunk, Document, DocumentStatus, Extraction, ExtractionMethod, SummarySection};
pub use quiz::{Question, QuestionType, Quiz, QuizStatus};
pub use usage::{PlanTier, UsagePeriod};
