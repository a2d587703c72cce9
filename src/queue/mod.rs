//! Durable SQLite-backed job queue.
//!
//! At-least-once FIFO delivery per job type with visibility timeouts,
//! enqueue deduplication, and a dead-letter queue. Claims run inside
//! `BEGIN IMMEDIATE` transactions so concurrent workers never receive the
//! same message while it is invisible.

mod message;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::config::QueueConfig;

pub use message::{dedup_key, JobPayload, JobType, PAYLOAD_VERSION};

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A received message. Holding the receipt entitles the worker to delete it;
/// an undeleted message becomes visible again after the visibility timeout.
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub job_id: String,
    pub job_type: JobType,
    /// Raw payload JSON; decode with [`JobMessage::payload`].
    pub body: String,
    pub receipt: String,
    pub receive_count: i64,
}

impl JobMessage {
    /// Decode the versioned payload. `Err` means an unknown or malformed
    /// shape; callers log-and-delete rather than crash.
    pub fn payload(&self) -> std::result::Result<JobPayload, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// A message that exhausted its delivery budget during a claim. Returned to
/// the caller so the owning entity can be marked failed instead of sitting
/// in a stale state with nothing but a DLQ row to show for it.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub job_id: String,
    /// Raw payload JSON; decode with [`DeadLetter::payload`].
    pub body: String,
}

impl DeadLetter {
    pub fn payload(&self) -> std::result::Result<JobPayload, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// One claim's results: deliverable messages plus any routed to the DLQ
/// while claiming.
#[derive(Debug, Default)]
pub struct ReceiveBatch {
    pub messages: Vec<JobMessage>,
    pub dead: Vec<DeadLetter>,
}

/// Per-queue depth counts for introspection.
#[derive(Debug, Clone, Default)]
pub struct QueueDepth {
    pub available: i64,
    pub inflight: i64,
    pub dead: i64,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

/// SQLite-backed durable job queue.
pub struct JobQueue {
    db_path: PathBuf,
    config: QueueConfig,
}

impl JobQueue {
    /// Open (and initialize) the queue at the given database path.
    pub fn new(db_path: &Path, config: QueueConfig) -> Result<Self> {
        let queue = Self {
            db_path: db_path.to_path_buf(),
            config,
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                dedup_key TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'available',
                visible_at TEXT NOT NULL,
                receipt TEXT,
                receive_count INTEGER NOT NULL DEFAULT 0,
                enqueued_at TEXT NOT NULL,
                dead_at TEXT,
                last_error TEXT
            );

            -- Dedup applies to live messages only; dead letters keep history
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_dedup
                ON jobs(job_type, dedup_key) WHERE status != 'dead';

            CREATE INDEX IF NOT EXISTS idx_jobs_poll
                ON jobs(job_type, status, visible_at);
            "#,
        )?;
        Ok(())
    }

    fn visibility_secs(&self, job_type: JobType) -> i64 {
        match job_type {
            JobType::DocumentProcessing => self.config.document_visibility_secs,
            JobType::QuizGeneration => self.config.quiz_visibility_secs,
        }
    }

    /// Enqueue a payload. Returns the job id, which is the id of an existing
    /// live duplicate when the dedup key collapses the enqueue.
    pub fn enqueue(&self, payload: &JobPayload, dedup: &str) -> Result<String> {
        let conn = self.connect()?;
        let job_type = payload.job_type();
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let body = serde_json::to_string(payload).expect("payload serialization is infallible");

        let inserted = conn.execute(
            r#"
            INSERT INTO jobs (id, job_type, payload, dedup_key, status, visible_at, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, 'available', ?5, ?5)
            ON CONFLICT (job_type, dedup_key) WHERE status != 'dead' DO NOTHING
            "#,
            params![job_id, job_type.as_str(), body, dedup, now],
        )?;

        if inserted == 0 {
            // Collapsed onto an existing live message
            let existing: String = conn.query_row(
                "SELECT id FROM jobs WHERE job_type = ? AND dedup_key = ? AND status != 'dead'",
                params![job_type.as_str(), dedup],
                |row| row.get(0),
            )?;
            tracing::debug!(job_type = job_type.as_str(), dedup, "enqueue deduplicated");
            return Ok(existing);
        }

        tracing::debug!(job_type = job_type.as_str(), job_id, "enqueued");
        Ok(job_id)
    }

    /// Long-poll receive: claims up to `max_messages`, waiting up to `wait`
    /// for at least one to become visible. Messages dead-lettered during the
    /// claim come back alongside so the caller can settle their entities.
    pub async fn receive(
        &self,
        job_type: JobType,
        max_messages: usize,
        wait: Duration,
    ) -> Result<ReceiveBatch> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let batch = self.claim_batch(job_type, max_messages)?;
            if !batch.messages.is_empty()
                || !batch.dead.is_empty()
                || tokio::time::Instant::now() >= deadline
            {
                return Ok(batch);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Atomically claim visible messages, routing exhausted ones to the DLQ.
    fn claim_batch(&self, job_type: JobType, max_messages: usize) -> Result<ReceiveBatch> {
        let conn = self.connect()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<ReceiveBatch> = (|| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, payload, receive_count FROM jobs
                WHERE job_type = ?1
                AND (status = 'available' OR (status = 'inflight' AND visible_at <= ?2))
                ORDER BY enqueued_at ASC
                LIMIT ?3
                "#,
            )?;
            let candidates: Vec<(String, String, i64)> = stmt
                .query_map(params![job_type.as_str(), now_str, max_messages as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let visible_at =
                (now + chrono::Duration::seconds(self.visibility_secs(job_type))).to_rfc3339();
            let mut batch = ReceiveBatch::default();

            for (id, payload, receive_count) in candidates {
                if receive_count >= self.config.max_receive_count {
                    // Exhausted its deliveries: dead-letter instead of redelivering
                    conn.execute(
                        "UPDATE jobs SET status = 'dead', dead_at = ?, receipt = NULL WHERE id = ?",
                        params![now_str, id],
                    )?;
                    tracing::warn!(job_id = id, job_type = job_type.as_str(), "moved to DLQ");
                    batch.dead.push(DeadLetter {
                        job_id: id,
                        body: payload,
                    });
                    continue;
                }

                let receipt = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    r#"
                    UPDATE jobs
                    SET status = 'inflight', visible_at = ?, receipt = ?, receive_count = receive_count + 1
                    WHERE id = ?
                    "#,
                    params![visible_at, receipt, id],
                )?;
                batch.messages.push(JobMessage {
                    job_id: id,
                    job_type,
                    body: payload,
                    receipt,
                    receive_count: receive_count + 1,
                });
            }

            Ok(batch)
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    /// Delete a message by receipt. Only the holder of the current receipt
    /// can delete; a stale receipt (message already redelivered) is a no-op.
    pub fn delete(&self, receipt: &str) -> Result<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE receipt = ? AND status = 'inflight'",
            params![receipt],
        )?;
        Ok(deleted > 0)
    }

    /// Record the failure reason on an in-flight message without consuming
    /// it, so the DLQ entry carries diagnostic context.
    pub fn record_failure(&self, receipt: &str, error: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE jobs SET last_error = ? WHERE receipt = ?",
            params![error, receipt],
        )?;
        Ok(())
    }

    /// List dead-lettered messages for a job type.
    pub fn dead_letters(&self, job_type: JobType) -> Result<Vec<(String, String, Option<String>)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, payload, last_error FROM jobs
             WHERE job_type = ? AND status = 'dead' ORDER BY dead_at ASC",
        )?;
        let rows = stmt
            .query_map(params![job_type.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Return a dead-lettered message to its queue with a fresh delivery
    /// budget.
    pub fn redrive(&self, job_id: &str) -> Result<()> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let updated = conn.execute(
            r#"
            UPDATE jobs
            SET status = 'available', visible_at = ?, receive_count = 0,
                receipt = NULL, dead_at = NULL
            WHERE id = ? AND status = 'dead'
            "#,
            params![now, job_id],
        )?;
        if updated == 0 {
            return Err(QueueError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    /// Depth counts for a queue.
    pub fn depth(&self, job_type: JobType) -> Result<QueueDepth> {
        let conn = self.connect()?;
        let mut depth = QueueDepth::default();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*), MIN(enqueued_at) FROM jobs WHERE job_type = ? GROUP BY status",
        )?;
        let rows = stmt.query_map(params![job_type.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (status, count, oldest) = row?;
            match status.as_str() {
                "available" => depth.available = count,
                "inflight" => depth.inflight = count,
                "dead" => depth.dead = count,
                _ => {}
            }
            if status != "dead" {
                let oldest = oldest.and_then(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                });
                depth.oldest_enqueued_at = match (depth.oldest_enqueued_at, oldest) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
        }
        Ok(depth)
    }

    /// Fetch a message's status by id (test and ops introspection).
    pub fn job_status(&self, job_id: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let status = conn
            .query_row(
                "SELECT status FROM jobs WHERE id = ?",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_queue(config: QueueConfig) -> (TempDir, JobQueue) {
        let dir = TempDir::new().unwrap();
        let queue = JobQueue::new(&dir.path().join("queue.db"), config).unwrap();
        (dir, queue)
    }

    fn payload(doc: &str) -> JobPayload {
        JobPayload::document_processing(doc, "key", "application/pdf", "u-1")
    }

    #[tokio::test]
    async fn enqueue_receive_delete() {
        let (_dir, queue) = test_queue(QueueConfig::default());
        queue.enqueue(&payload("doc-1"), "doc-1:0").unwrap();

        let messages = queue
            .receive(JobType::DocumentProcessing, 10, Duration::ZERO)
            .await
            .unwrap()
            .messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].receive_count, 1);
        assert_eq!(messages[0].payload().unwrap().entity_id(), "doc-1");

        // Invisible while in flight
        let again = queue
            .receive(JobType::DocumentProcessing, 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(again.messages.is_empty());

        assert!(queue.delete(&messages[0].receipt).unwrap());
        assert!(!queue.delete(&messages[0].receipt).unwrap());
    }

    #[tokio::test]
    async fn duplicate_dedup_key_collapses() {
        let (_dir, queue) = test_queue(QueueConfig::default());
        let first = queue.enqueue(&payload("doc-1"), "doc-1:42").unwrap();
        let second = queue.enqueue(&payload("doc-1"), "doc-1:42").unwrap();
        assert_eq!(first, second);

        // A different bucket is a distinct message
        let third = queue.enqueue(&payload("doc-1"), "doc-1:43").unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn expired_visibility_redelivers() {
        let config = QueueConfig {
            document_visibility_secs: 0,
            ..QueueConfig::default()
        };
        let (_dir, queue) = test_queue(config);
        queue.enqueue(&payload("doc-1"), "k").unwrap();

        let first = queue
            .receive(JobType::DocumentProcessing, 1, Duration::ZERO)
            .await
            .unwrap()
            .messages;
        assert_eq!(first.len(), 1);

        // Zero visibility timeout: immediately redeliverable with a new receipt
        let second = queue
            .receive(JobType::DocumentProcessing, 1, Duration::ZERO)
            .await
            .unwrap()
            .messages;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(first[0].receipt, second[0].receipt);

        // The stale receipt can no longer delete
        assert!(!queue.delete(&first[0].receipt).unwrap());
        assert!(queue.delete(&second[0].receipt).unwrap());
    }

    #[tokio::test]
    async fn poison_message_dead_letters() {
        let config = QueueConfig {
            document_visibility_secs: 0,
            max_receive_count: 2,
            ..QueueConfig::default()
        };
        let (_dir, queue) = test_queue(config);
        let job_id = queue.enqueue(&payload("doc-1"), "k").unwrap();

        for _ in 0..2 {
            let batch = queue
                .receive(JobType::DocumentProcessing, 1, Duration::ZERO)
                .await
                .unwrap();
            assert_eq!(batch.messages.len(), 1);
            assert!(batch.dead.is_empty());
        }

        // Third claim routes it to the DLQ instead of delivering, and the
        // caller learns about it so the owning entity can be settled
        let batch = queue
            .receive(JobType::DocumentProcessing, 1, Duration::ZERO)
            .await
            .unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.dead.len(), 1);
        assert_eq!(batch.dead[0].job_id, job_id);
        assert_eq!(batch.dead[0].payload().unwrap().entity_id(), "doc-1");
        assert_eq!(queue.job_status(&job_id).unwrap().as_deref(), Some("dead"));

        let dead = queue.dead_letters(JobType::DocumentProcessing).unwrap();
        assert_eq!(dead.len(), 1);

        // Redrive restores a full delivery budget
        queue.redrive(&job_id).unwrap();
        let batch = queue
            .receive(JobType::DocumentProcessing, 1, Duration::ZERO)
            .await
            .unwrap()
            .messages;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, 1);
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let (_dir, queue) = test_queue(QueueConfig::default());
        queue.enqueue(&payload("doc-1"), "a").unwrap();
        queue
            .enqueue(&JobPayload::quiz_generation("quiz-1", "doc-1", 8), "b")
            .unwrap();

        let quiz_batch = queue
            .receive(JobType::QuizGeneration, 10, Duration::ZERO)
            .await
            .unwrap()
            .messages;
        assert_eq!(quiz_batch.len(), 1);
        assert_eq!(quiz_batch[0].job_type, JobType::QuizGeneration);

        let depth = queue.depth(JobType::DocumentProcessing).unwrap();
        assert_eq!(depth.available, 1);
        assert_eq!(depth.inflight, 0);
    }
}
