//! Plan lookup and usage accounting.
//!
//! Paid-tier usage is a per-period counter incremented strictly after
//! question persistence succeeds. Free-tier usage is never counted here at
//! all: it is derived by counting ready quiz rows, which cannot drift.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Repository, Result};
use crate::models::PlanTier;

/// Calendar-month period bounds containing `at`.
pub fn period_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .unwrap();
    let (next_year, next_month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    let end = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).unwrap();
    (start, end)
}

impl Repository {
    /// Plan tier for a user. Unknown users default to the free tier.
    pub fn plan_for_user(&self, user_id: &str) -> Result<PlanTier> {
        let conn = self.connect()?;
        let tier: Option<String> = conn
            .query_row(
                "SELECT tier FROM user_plans WHERE user_id = ?",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tier
            .as_deref()
            .and_then(PlanTier::parse)
            .unwrap_or(PlanTier::Free))
    }

    pub fn set_plan(&self, user_id: &str, tier: PlanTier) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO user_plans (user_id, tier, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id) DO UPDATE SET tier = excluded.tier,
                                               updated_at = excluded.updated_at
            "#,
            params![user_id, tier.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Completed generations in the period containing `at`.
    pub fn generation_count_in_period(&self, user_id: &str, at: DateTime<Utc>) -> Result<i64> {
        let (start, _) = period_bounds(at);
        let conn = self.connect()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT generation_count FROM usage_periods
                 WHERE user_id = ? AND period_start = ?",
                params![user_id, start.to_rfc3339()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Record one completed generation in the current period.
    ///
    /// Called only after the question set has been persisted, so redelivered
    /// jobs that fail before persistence never inflate the counter.
    pub fn record_completed_generation(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let (start, end) = period_bounds(at);
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO usage_periods (id, user_id, period_start, period_end, generation_count)
            VALUES (?1, ?2, ?3, ?4, 1)
            ON CONFLICT (user_id, period_start)
                DO UPDATE SET generation_count = generation_count + 1
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                user_id,
                start.to_rfc3339(),
                end.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
