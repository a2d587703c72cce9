//! SQLite persistence for documents, chunks, quizzes, and usage.
//!
//! One repository struct, short-lived connections per call, schema created
//! idempotently on open. The store is the pipeline's only synchronization
//! point: every cross-worker guarantee (one quiz generating per document,
//! chunks written once per extraction) is enforced here with constraints,
//! not with in-process locks.

mod document;
mod quiz;
mod usage;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row failed to decode (bad status tag, malformed JSON).
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// SQLite-backed repository for all pipeline entities.
pub struct Repository {
    db_path: PathBuf,
}

impl Repository {
    /// Open (and initialize) the repository at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                blob_key TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                status TEXT NOT NULL,
                page_count INTEGER,
                summary TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS extractions (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id),
                text TEXT NOT NULL,
                method TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_extractions_document
                ON extractions(document_id, created_at);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id),
                extraction_id TEXT NOT NULL REFERENCES extractions(id),
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                token_estimate INTEGER NOT NULL,
                UNIQUE (extraction_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document
                ON chunks(document_id, chunk_index);

            CREATE TABLE IF NOT EXISTS quizzes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                document_id TEXT NOT NULL REFERENCES documents(id),
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- At most one quiz may be generating per (document, user); the
            -- partial unique index makes create-if-absent a single atomic
            -- insert instead of a racy check-then-insert
            CREATE UNIQUE INDEX IF NOT EXISTS idx_quizzes_generating
                ON quizzes(document_id, user_id) WHERE status = 'generating';

            CREATE INDEX IF NOT EXISTS idx_quizzes_document
                ON quizzes(document_id, status);

            CREATE TABLE IF NOT EXISTS questions (
                id TEXT PRIMARY KEY,
                quiz_id TEXT NOT NULL REFERENCES quizzes(id),
                question_index INTEGER NOT NULL,
                question_type TEXT NOT NULL,
                prompt TEXT NOT NULL,
                choices TEXT NOT NULL,
                answer_index INTEGER NOT NULL,
                explanation TEXT NOT NULL,
                source_ref TEXT,
                UNIQUE (quiz_id, question_index)
            );

            CREATE TABLE IF NOT EXISTS usage_periods (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                period_start TEXT NOT NULL,
                period_end TEXT NOT NULL,
                generation_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE (user_id, period_start)
            );

            CREATE TABLE IF NOT EXISTS user_plans (
                user_id TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}
