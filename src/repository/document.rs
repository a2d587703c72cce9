//! Document, extraction, and chunk persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{Repository, RepositoryError, Result};
use crate::models::{
    Chunk, Document, DocumentStatus, Extraction, ExtractionMethod, SummarySection,
};

pub(super) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<(Document, String, String, Option<String>)> {
    Ok((
        Document {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            filename: row.get("filename")?,
            blob_key: row.get("blob_key")?,
            mime_type: row.get("mime_type")?,
            status: DocumentStatus::Uploaded, // patched by caller
            page_count: row.get("page_count")?,
            summary: None, // patched by caller
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        row.get("created_at")?,
        row.get("updated_at")?,
        row.get("summary")?,
    ))
}

impl Repository {
    pub fn create_document(&self, document: &Document) -> Result<()> {
        let conn = self.connect()?;
        let summary = document
            .summary
            .as_ref()
            .map(|s| serde_json::to_string(s).expect("summary serialization is infallible"));
        conn.execute(
            r#"
            INSERT INTO documents
                (id, user_id, filename, blob_key, mime_type, status, page_count, summary,
                 created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                document.id,
                document.user_id,
                document.filename,
                document.blob_key,
                document.mime_type,
                document.status.as_str(),
                document.page_count,
                summary,
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Document> {
        let conn = self.connect()?;
        let raw = conn
            .query_row(
                "SELECT id, user_id, filename, blob_key, mime_type, status, page_count,
                        summary, created_at, updated_at
                 FROM documents WHERE id = ?",
                params![id],
                |row| {
                    let status: String = row.get("status")?;
                    let parts = document_from_row(row)?;
                    Ok((parts, status))
                },
            )
            .optional()?;

        let ((mut document, created_at, updated_at, summary), status) =
            raw.ok_or_else(|| RepositoryError::NotFound(format!("document {id}")))?;

        document.status = DocumentStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Corrupt(format!("document status {status:?}")))?;
        document.created_at = parse_timestamp(&created_at)?;
        document.updated_at = parse_timestamp(&updated_at)?;
        document.summary = match summary {
            Some(raw) => Some(
                serde_json::from_str::<Vec<SummarySection>>(&raw)
                    .map_err(|e| RepositoryError::Corrupt(format!("document summary: {e}")))?,
            ),
            None => None,
        };
        Ok(document)
    }

    pub fn set_document_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE documents SET status = ?, updated_at = ? WHERE id = ?",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("document {id}")));
        }
        tracing::debug!(document_id = id, status = status.as_str(), "document status");
        Ok(())
    }

    pub fn set_document_summary(&self, id: &str, summary: &[SummarySection]) -> Result<()> {
        let conn = self.connect()?;
        let raw = serde_json::to_string(summary).expect("summary serialization is infallible");
        conn.execute(
            "UPDATE documents SET summary = ?, updated_at = ? WHERE id = ?",
            params![raw, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn set_document_page_count(&self, id: &str, page_count: u32) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE documents SET page_count = ?, updated_at = ? WHERE id = ?",
            params![page_count, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Correct the stored MIME type after content sniffing at processing time.
    pub fn set_document_mime(&self, id: &str, mime_type: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE documents SET mime_type = ?, updated_at = ? WHERE id = ?",
            params![mime_type, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Latest extraction for a document, if any. Redelivered processing jobs
    /// reuse this instead of re-extracting.
    pub fn latest_extraction(&self, document_id: &str) -> Result<Option<Extraction>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT id, document_id, text, method, created_at FROM extractions
                 WHERE document_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
                params![document_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, document_id, text, method, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Extraction {
            id,
            document_id,
            text,
            method: ExtractionMethod::parse(&method)
                .ok_or_else(|| RepositoryError::Corrupt(format!("extraction method {method:?}")))?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }

    pub fn insert_extraction(&self, extraction: &Extraction) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO extractions (id, document_id, text, method, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                extraction.id,
                extraction.document_id,
                extraction.text,
                extraction.method.as_str(),
                extraction.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Whether chunks were already persisted for this extraction. Gates the
    /// chunk/embed stage on redelivery.
    pub fn chunks_exist_for_extraction(&self, extraction_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE extraction_id = ?",
            params![extraction_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a chunk set in one transaction: all rows or none, so a partial
    /// chunk set is never observable.
    pub fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for chunk in chunks {
            tx.execute(
                r#"
                INSERT INTO chunks
                    (id, document_id, extraction_id, chunk_index, text, embedding, token_estimate)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    chunk.id,
                    chunk.document_id,
                    chunk.extraction_id,
                    chunk.chunk_index,
                    chunk.text,
                    chunk.embedding_bytes(),
                    chunk.token_estimate,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// All chunks for a document in document order.
    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, document_id, extraction_id, chunk_index, text, embedding, token_estimate
             FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
        )?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                let embedding: Vec<u8> = row.get(5)?;
                Ok(Chunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    extraction_id: row.get(2)?,
                    chunk_index: row.get(3)?,
                    text: row.get(4)?,
                    embedding: Chunk::embedding_from_bytes(&embedding),
                    token_estimate: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_repository;
    use super::*;

    fn sample_document(id: &str) -> Document {
        Document::new(
            id.to_string(),
            "user-1".to_string(),
            "week3.pdf".to_string(),
            "abc123".to_string(),
            "application/pdf".to_string(),
        )
    }

    #[test]
    fn document_round_trips_with_summary() {
        let (_dir, repo) = test_repository();
        repo.create_document(&sample_document("doc-1")).unwrap();

        let loaded = repo.get_document("doc-1").unwrap();
        assert_eq!(loaded.status, DocumentStatus::Uploaded);
        assert!(loaded.summary.is_none());

        repo.set_document_status("doc-1", DocumentStatus::Processing)
            .unwrap();
        repo.set_document_summary(
            "doc-1",
            &[SummarySection {
                title: "Key ideas".into(),
                points: vec!["point one".into()],
            }],
        )
        .unwrap();
        repo.set_document_page_count("doc-1", 12).unwrap();

        let loaded = repo.get_document("doc-1").unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processing);
        assert_eq!(loaded.page_count, Some(12));
        assert_eq!(loaded.summary.unwrap()[0].title, "Key ideas");
    }

    #[test]
    fn missing_document_is_not_found() {
        let (_dir, repo) = test_repository();
        assert!(matches!(
            repo.get_document("nope"),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(matches!(
            repo.set_document_status("nope", DocumentStatus::Ready),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn latest_extraction_wins() {
        let (_dir, repo) = test_repository();
        repo.create_document(&sample_document("doc-1")).unwrap();
        assert!(repo.latest_extraction("doc-1").unwrap().is_none());

        let mut first = Extraction::new(
            "doc-1".into(),
            "old text".into(),
            ExtractionMethod::PdfText,
        );
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        repo.insert_extraction(&first).unwrap();

        let second = Extraction::new("doc-1".into(), "new text".into(), ExtractionMethod::PdfOcr);
        repo.insert_extraction(&second).unwrap();

        let latest = repo.latest_extraction("doc-1").unwrap().unwrap();
        assert_eq!(latest.text, "new text");
        assert_eq!(latest.method, ExtractionMethod::PdfOcr);
    }

    #[test]
    fn chunk_batch_round_trips_embeddings() {
        let (_dir, repo) = test_repository();
        repo.create_document(&sample_document("doc-1")).unwrap();
        let extraction =
            Extraction::new("doc-1".into(), "text".into(), ExtractionMethod::DocxXml);
        repo.insert_extraction(&extraction).unwrap();

        assert!(!repo.chunks_exist_for_extraction(&extraction.id).unwrap());

        let chunks: Vec<Chunk> = (0..3)
            .map(|i| Chunk {
                id: format!("chunk-{i}"),
                document_id: "doc-1".into(),
                extraction_id: extraction.id.clone(),
                chunk_index: i,
                text: format!("chunk {i}"),
                embedding: vec![i as f32, 0.5, -1.25],
                token_estimate: 2,
            })
            .collect();
        repo.insert_chunks(&chunks).unwrap();

        assert!(repo.chunks_exist_for_extraction(&extraction.id).unwrap());
        let loaded = repo.chunks_for_document("doc-1").unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].embedding, vec![2.0, 0.5, -1.25]);
        assert_eq!(loaded[0].chunk_index, 0);
    }

    #[test]
    fn duplicate_chunk_index_rolls_back_whole_batch() {
        let (_dir, repo) = test_repository();
        repo.create_document(&sample_document("doc-1")).unwrap();
        let extraction =
            Extraction::new("doc-1".into(), "text".into(), ExtractionMethod::DocxXml);
        repo.insert_extraction(&extraction).unwrap();

        let chunk = |id: &str, index: u32| Chunk {
            id: id.to_string(),
            document_id: "doc-1".into(),
            extraction_id: extraction.id.clone(),
            chunk_index: index,
            text: "t".into(),
            embedding: vec![0.0],
            token_estimate: 1,
        };
        let result = repo.insert_chunks(&[chunk("a", 0), chunk("b", 1), chunk("c", 1)]);
        assert!(result.is_err());
        // Nothing from the failed batch is visible
        assert!(repo.chunks_for_document("doc-1").unwrap().is_empty());
    }
}
