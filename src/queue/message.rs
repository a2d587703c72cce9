//! Versioned job message payloads.
//!
//! Payloads are tagged JSON so a receiver can reject a message of unknown
//! shape without crashing: a decode failure is logged and the message is
//! consumed rather than wedging the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job types, one logical queue each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DocumentProcessing,
    QuizGeneration,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document_processing",
            Self::QuizGeneration => "quiz_generation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document_processing" => Some(Self::DocumentProcessing),
            "quiz_generation" => Some(Self::QuizGeneration),
            _ => None,
        }
    }
}

/// Current payload schema version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Tagged, versioned job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    DocumentProcessing {
        v: u32,
        document_id: String,
        blob_key: String,
        mime_type: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    QuizGeneration {
        v: u32,
        quiz_id: String,
        document_id: String,
        question_count: u32,
        timestamp: DateTime<Utc>,
    },
}

impl JobPayload {
    pub fn document_processing(
        document_id: impl Into<String>,
        blob_key: impl Into<String>,
        mime_type: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self::DocumentProcessing {
            v: PAYLOAD_VERSION,
            document_id: document_id.into(),
            blob_key: blob_key.into(),
            mime_type: mime_type.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn quiz_generation(
        quiz_id: impl Into<String>,
        document_id: impl Into<String>,
        question_count: u32,
    ) -> Self {
        Self::QuizGeneration {
            v: PAYLOAD_VERSION,
            quiz_id: quiz_id.into(),
            document_id: document_id.into(),
            question_count,
            timestamp: Utc::now(),
        }
    }

    /// The queue this payload belongs on.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::DocumentProcessing { .. } => JobType::DocumentProcessing,
            Self::QuizGeneration { .. } => JobType::QuizGeneration,
        }
    }

    /// The entity id the dedup key is derived from.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::DocumentProcessing { document_id, .. } => document_id,
            Self::QuizGeneration { quiz_id, .. } => quiz_id,
        }
    }
}

/// Derive a dedup key from the entity id plus a time bucket of the enqueue
/// time: rapid duplicates of the identical job collapse, while a legitimate
/// re-enqueue after failure (a later bucket) does not.
pub fn dedup_key(entity_id: &str, bucket_secs: i64) -> String {
    let bucket = if bucket_secs > 0 {
        Utc::now().timestamp() / bucket_secs
    } else {
        0
    };
    format!("{entity_id}:{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_through_json() {
        let payload = JobPayload::document_processing("doc-1", "abc123", "application/pdf", "u-1");
        let raw = serde_json::to_string(&payload).unwrap();
        assert!(raw.contains("\"type\":\"document_processing\""));

        let decoded: JobPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(decoded.entity_id(), "doc-1");
        assert_eq!(decoded.job_type(), JobType::DocumentProcessing);
    }

    #[test]
    fn unknown_type_fails_to_decode() {
        let raw = r#"{"type":"reindex_all","v":1,"timestamp":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<JobPayload>(raw).is_err());
    }

    #[test]
    fn dedup_key_collapses_within_bucket() {
        let a = dedup_key("doc-1", 3600);
        let b = dedup_key("doc-1", 3600);
        assert_eq!(a, b);
        assert!(a.starts_with("doc-1:"));
    }
}
