//! Usage accounting models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing plan tier for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Paid,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Self::Free),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

/// Period-scoped generation counter for paid-tier users.
///
/// The counter increments only on successful quiz completion, never on
/// enqueue. Free-tier usage is computed by counting ready quizzes instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub id: String,
    pub user_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub generation_count: i64,
}
