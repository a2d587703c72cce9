//! Quiz and question models.
//!
//! A quiz row is created when generation starts; at most one quiz per
//! (document, user) pair may be `generating` at a time. Questions are
//! written as a batch when generation succeeds and never mutated after.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Generating,
    Ready,
    Failed,
}

impl QuizStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(Self::Generating),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Kind of question the generator produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "multiple_choice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "multiple_choice" => Some(Self::MultipleChoice),
            _ => None,
        }
    }
}

/// A generated quiz for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub user_id: String,
    pub document_id: String,
    pub title: String,
    pub status: QuizStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    /// Create a new quiz in the `generating` state.
    pub fn new(user_id: String, document_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            document_id,
            title,
            status: QuizStatus::Generating,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A validated multiple-choice question.
///
/// Always exactly 4 choices; `answer_index` is zero-based in 0..=3. The
/// generator's validation enforces both before a row is ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub quiz_id: String,
    /// Position within the quiz, zero-based.
    pub question_index: u32,
    pub question_type: QuestionType,
    pub prompt: String,
    pub choices: Vec<String>,
    pub answer_index: u8,
    pub explanation: String,
    /// Page/slide number or excerpt the question was drawn from.
    pub source_ref: Option<String>,
}
