//! Blob storage for uploaded document content.
//!
//! The pipeline treats object storage as an external collaborator with a
//! narrow get/put/presign contract. The local filesystem implementation uses
//! a two-level directory layout keyed by hash prefix so a single directory
//! never accumulates every blob.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed blob store contract. No blob is ever mutated.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch a blob's bytes.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Store bytes under a key. Writing the same key twice is a no-op since
    /// keys are content-addressed.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StorageError>;

    /// Produce a URL a client can upload to directly.
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;
}

/// Filesystem-backed blob store.
///
/// Layout: `{root}/{key[0..2]}/{key}` where keys are SHA-256 hex digests.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.len() < 2 || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(&key[..2]).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), StorageError> {
        let path = self.blob_path(key)?;
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write to a temp name then rename so readers never see partial blobs
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let path = self.blob_path(key)?;
        let expires = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        Ok(format!(
            "file://{}?content-type={}&expires={}",
            path.display(),
            content_type,
            expires.timestamp()
        ))
    }
}

/// Write an uploaded file into the store, returning its content-addressed key.
pub async fn store_upload(
    store: &dyn BlobStore,
    path: &Path,
    content_type: &str,
) -> Result<String, StorageError> {
    let bytes = tokio::fs::read(path).await?;
    let key = crate::models::Document::blob_key_for(&bytes);
    store.put(&key, &bytes, content_type).await?;
    Ok(key)
}
