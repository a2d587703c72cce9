//! Question and summary generation against a chat-completions API.
//!
//! Responses are requested in JSON mode and validated strictly: exactly 4
//! choices per question, a zero-based answer index in range, no empty
//! fields. More questions than requested are truncated; fewer is an error,
//! since a short quiz silently cheats the user.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{classify_status, parse_retry_after, prompts, LlmError};
use crate::config::GenerationConfig;
use crate::models::SummarySection;

/// A validated question as produced by the generator, before persistence
/// assigns it a quiz and an id.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftQuestion {
    pub prompt: String,
    pub choices: Vec<String>,
    pub answer_index: u8,
    pub explanation: String,
    pub source_ref: Option<String>,
}

/// Question shape as the model emits it, prior to validation.
#[derive(Debug, Deserialize)]
pub struct RawQuestion {
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
    pub answer_index: i64,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub source_ref: Option<String>,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate exactly `count` validated questions from the given context.
    async fn generate_questions(
        &self,
        title: &str,
        context: &str,
        count: usize,
    ) -> Result<Vec<DraftQuestion>, LlmError>;

    /// Generate a structured summary of the document text.
    async fn generate_summary(
        &self,
        title: &str,
        text: &str,
    ) -> Result<Vec<SummarySection>, LlmError>;
}

pub struct HttpGenerationClient {
    http: reqwest::Client,
    config: GenerationConfig,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct QuestionsEnvelope {
    questions: Vec<RawQuestion>,
}

#[derive(Deserialize)]
struct SummaryEnvelope {
    sections: Vec<RawSection>,
}

#[derive(Deserialize)]
struct RawSection {
    title: String,
    #[serde(default)]
    points: Vec<String>,
}

impl HttpGenerationClient {
    pub fn new(config: GenerationConfig, api_key: Option<String>) -> Result<Self, LlmError> {
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

    /// One chat-completions call in JSON mode; returns the message content.
    async fn chat(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "response_format": {"type": "json_object"},
            "max_tokens": self.config.max_output_tokens,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text, retry_after));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("response contained no choices".to_string()))
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate_questions(
        &self,
        title: &str,
        context: &str,
        count: usize,
    ) -> Result<Vec<DraftQuestion>, LlmError> {
        let user = prompts::question_user(title, count, context);
        let content = self.chat(prompts::QUESTION_SYSTEM, &user).await?;

        let envelope: QuestionsEnvelope =
            serde_json::from_str(&content).map_err(|e| LlmError::Parse(e.to_string()))?;

        validate_questions(envelope.questions, count)
    }

    async fn generate_summary(
        &self,
        title: &str,
        text: &str,
    ) -> Result<Vec<SummarySection>, LlmError> {
        let user = prompts::summary_user(title, text);
        let content = self.chat(prompts::SUMMARY_SYSTEM, &user).await?;

        let envelope: SummaryEnvelope =
            serde_json::from_str(&content).map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut sections = Vec::with_capacity(envelope.sections.len());
        for raw in envelope.sections {
            let title = raw.title.trim().to_string();
            let points: Vec<String> = raw
                .points
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if title.is_empty() || points.is_empty() {
                return Err(LlmError::Schema(
                    "summary section with empty title or no points".to_string(),
                ));
            }
            sections.push(SummarySection { title, points });
        }

        if sections.is_empty() {
            return Err(LlmError::Schema("summary contained no sections".to_string()));
        }
        Ok(sections)
    }
}

/// Validate raw model questions against the output contract.
///
/// Excess questions are dropped from the end; a shortfall is a hard error.
pub fn validate_questions(
    raw: Vec<RawQuestion>,
    requested: usize,
) -> Result<Vec<DraftQuestion>, LlmError> {
    if raw.len() < requested {
        return Err(LlmError::Schema(format!(
            "model returned {} questions, requested {requested}",
            raw.len()
        )));
    }
    if raw.len() > requested {
        tracing::debug!(
            returned = raw.len(),
            requested,
            "model over-produced questions, truncating"
        );
    }

    let mut questions = Vec::with_capacity(requested);
    for (i, q) in raw.into_iter().take(requested).enumerate() {
        if q.choices.len() != 4 {
            return Err(LlmError::Schema(format!(
                "question {i} has {} choices, expected 4",
                q.choices.len()
            )));
        }
        if !(0..=3).contains(&q.answer_index) {
            return Err(LlmError::Schema(format!(
                "question {i} answer_index {} out of range 0..=3",
                q.answer_index
            )));
        }

        let prompt = q.question.trim().to_string();
        let explanation = q.explanation.trim().to_string();
        let choices: Vec<String> = q.choices.iter().map(|c| c.trim().to_string()).collect();
        if prompt.is_empty() || explanation.is_empty() || choices.iter().any(|c| c.is_empty()) {
            return Err(LlmError::Schema(format!("question {i} has an empty field")));
        }

        questions.push(DraftQuestion {
            prompt,
            choices,
            answer_index: q.answer_index as u8,
            explanation,
            source_ref: q
                .source_ref
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        });
    }
    Ok(questions)
}
