//! SQLite-backed document store and vector index
//!
//! Embedding vectors are stored as little-endian f32 blobs beside their
//! chunk rows. Each upsert is a single `INSERT .. ON CONFLICT` statement
//! keyed on `(document_id, ordinal)`, so a crash between chunk N and N+1
//! leaves every committed vector intact and a re-ingest replaces rather
//! than duplicates. Queries are a brute-force cosine scan over the
//! collection, computed in f64 with deterministic tie-breaking.
//!
//! Decoding failures (wrong blob length, non-finite values, dimension
//! mismatch) are surfaced as `IndexCorrupted` for the whole collection;
//! recovery is a rebuild from the stored source documents.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use presail_common::db::DbPool;
use presail_common::errors::{AppError, Result};
use presail_common::models::{ChunkRecord, DocFormat, Document, IngestStatus, OwnerKind};

/// CRUD over the `documents` table, shared by the ingestion pipeline and
/// the gateway handlers.
#[derive(Clone)]
pub struct DocumentStore {
    pool: DbPool,
}

/// Fields needed to register a new upload
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_kind: OwnerKind,
    pub owner_id: Uuid,
    pub title: String,
    pub filename: String,
    pub format: DocFormat,
    pub size_bytes: i64,
    pub content_hash: String,
    pub industry: Option<String>,
    pub tags: Vec<String>,
}

impl DocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register an upload, resetting the existing row when the same owner
    /// re-uploads the same filename. The row id is stable across
    /// re-uploads so chunk identity stays deterministic.
    pub async fn upsert(&self, new: &NewDocument) -> Result<Document> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let tags = serde_json::to_string(&new.tags)?;

        let row = sqlx::query(
            r#"
            INSERT INTO documents
                (id, owner_kind, owner_id, collection, title, filename, format,
                 size_bytes, status, failure_reason, chunk_count, content_hash,
                 industry, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', NULL, 0, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_kind, owner_id, filename) DO UPDATE SET
                title = excluded.title,
                format = excluded.format,
                size_bytes = excluded.size_bytes,
                status = 'pending',
                failure_reason = NULL,
                content_hash = excluded.content_hash,
                industry = excluded.industry,
                tags = excluded.tags,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(id.to_string())
        .bind(new.owner_kind.as_str())
        .bind(new.owner_id.to_string())
        .bind(new.owner_kind.collection())
        .bind(&new.title)
        .bind(&new.filename)
        .bind(new.format.as_str())
        .bind(new.size_bytes)
        .bind(&new.content_hash)
        .bind(&new.industry)
        .bind(&tags)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let stored_id: String = row.try_get("id")?;
        let stored_id = parse_uuid(&stored_id, "id")?;

        self.get(stored_id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound {
                id: stored_id.to_string(),
            })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| document_from_row(&r)).transpose()
    }

    /// List documents, optionally narrowed to an owning entity
    pub async fn list(
        &self,
        owner_kind: Option<OwnerKind>,
        owner_id: Option<Uuid>,
    ) -> Result<Vec<Document>> {
        let mut sql = String::from("SELECT * FROM documents WHERE 1=1");
        if owner_kind.is_some() {
            sql.push_str(" AND owner_kind = ?");
        }
        if owner_id.is_some() {
            sql.push_str(" AND owner_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id");

        let mut query = sqlx::query(&sql);
        if let Some(kind) = owner_kind {
            query = query.bind(kind.as_str());
        }
        if let Some(owner) = owner_id {
            query = query.bind(owner.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Terminal success: ingestion finished with `chunk_count` chunks indexed
    pub async fn mark_processed(&self, id: Uuid, chunk_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE documents
             SET status = 'processed', failure_reason = NULL, chunk_count = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(chunk_count)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure with a caller-visible reason
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents
             SET status = 'failed', failure_reason = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a document; chunk rows follow via ON DELETE CASCADE
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// One chunk surviving a nearest-neighbor query, joined with its source
/// document's metadata for citation building.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub ordinal: i32,
    pub content: String,
    pub title: String,
    pub industry: Option<String>,
    pub tags: Vec<String>,
    pub page_start: Option<i32>,
    pub page_end: Option<i32>,
    pub score: f32,
}

/// Persistent vector index over the `chunks` table
#[derive(Clone)]
pub struct VectorIndex {
    pool: DbPool,
    dimension: usize,
}

impl VectorIndex {
    pub fn new(pool: DbPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Store one chunk with its embedding. A single atomic statement:
    /// re-upserting the same `(document_id, ordinal)` replaces the row.
    pub async fn upsert(
        &self,
        chunk: &ChunkRecord,
        embedding: &[f32],
        model: &str,
    ) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(AppError::Internal {
                message: format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    embedding.len()
                ),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Internal {
                message: "embedding contains non-finite values".into(),
            });
        }

        let blob = encode_embedding(embedding);
        sqlx::query(
            r#"
            INSERT INTO chunks
                (id, document_id, ordinal, content, token_count, start_pos, end_pos,
                 page_start, page_end, content_hash, embedding, embedding_model,
                 embedding_dim, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (document_id, ordinal) DO UPDATE SET
                id = excluded.id,
                content = excluded.content,
                token_count = excluded.token_count,
                start_pos = excluded.start_pos,
                end_pos = excluded.end_pos,
                page_start = excluded.page_start,
                page_end = excluded.page_end,
                content_hash = excluded.content_hash,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                embedding_dim = excluded.embedding_dim,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(chunk.id.to_string())
        .bind(chunk.document_id.to_string())
        .bind(chunk.ordinal)
        .bind(&chunk.content)
        .bind(chunk.token_count)
        .bind(chunk.start_pos)
        .bind(chunk.end_pos)
        .bind(chunk.page_start)
        .bind(chunk.page_end)
        .bind(&chunk.content_hash)
        .bind(&blob)
        .bind(model)
        .bind(self.dimension as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop chunk rows at or beyond `first_stale_ordinal`. A re-ingest of
    /// a document that shrank leaves stale tail ordinals; this trims them.
    pub async fn trim_beyond(&self, document_id: Uuid, first_stale_ordinal: i32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ? AND ordinal >= ?")
            .bind(document_id.to_string())
            .bind(first_stale_ordinal)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_document_chunks(&self, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Indexed chunk ids with their embedding hashes for a document,
    /// ordered by ordinal. Used by idempotency checks and tests.
    pub async fn chunk_ids(&self, document_id: Uuid) -> Result<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            "SELECT id, content_hash FROM chunks WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let hash: String = row.try_get("content_hash")?;
                Ok((parse_uuid(&id, "id")?, hash))
            })
            .collect()
    }

    /// Nearest-neighbor query over one collection.
    ///
    /// Returns at most `k` chunks with cosine similarity >= `min_score`,
    /// ordered by descending score; ties broken by most recent indexing
    /// time, then chunk id, so repeated queries rank identically.
    pub async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.ordinal, c.content, c.page_start, c.page_end,
                   c.embedding, c.embedding_dim, c.indexed_at,
                   d.title, d.industry, d.tags
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection = ? AND c.embedding IS NOT NULL
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<(ScoredChunk, DateTime<Utc>)> = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let stored_dim: i64 = row.try_get("embedding_dim")?;
            if stored_dim as usize != self.dimension {
                return Err(AppError::IndexCorrupted {
                    collection: collection.to_string(),
                    reason: format!(
                        "stored dimension {stored_dim} does not match configured {}",
                        self.dimension
                    ),
                });
            }
            let stored = decode_embedding(&blob, self.dimension).map_err(|reason| {
                AppError::IndexCorrupted {
                    collection: collection.to_string(),
                    reason,
                }
            })?;

            let score = match cosine_similarity(vector, &stored) {
                Some(s) => s as f32,
                None => continue,
            };
            if score < min_score {
                continue;
            }

            let chunk_id: String = row.try_get("id")?;
            let document_id: String = row.try_get("document_id")?;
            let tags: String = row.try_get("tags")?;
            let indexed_at: DateTime<Utc> = row.try_get("indexed_at")?;

            hits.push((
                ScoredChunk {
                    chunk_id: parse_uuid(&chunk_id, "id")?,
                    document_id: parse_uuid(&document_id, "document_id")?,
                    ordinal: row.try_get("ordinal")?,
                    content: row.try_get("content")?,
                    title: row.try_get("title")?,
                    industry: row.try_get("industry")?,
                    tags: serde_json::from_str(&tags)?,
                    page_start: row.try_get("page_start")?,
                    page_end: row.try_get("page_end")?,
                    score,
                },
                indexed_at,
            ));
        }

        hits.sort_by(|(a, a_at), (b, b_at)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_at.cmp(a_at))
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);

        Ok(hits.into_iter().map(|(chunk, _)| chunk).collect())
    }
}

/// Little-endian f32 codec for the embedding blob column
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_embedding(blob: &[u8], dimension: usize) -> std::result::Result<Vec<f32>, String> {
    let expected = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected {
        return Err(format!(
            "embedding blob has {} bytes, expected {expected}",
            blob.len()
        ));
    }
    let mut out = Vec::with_capacity(dimension);
    for window in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([window[0], window[1], window[2], window[3]]);
        if !value.is_finite() {
            return Err("embedding contains non-finite values".to_string());
        }
        out.push(value);
    }
    Ok(out)
}

/// Cosine similarity computed in f64; None for mismatched or degenerate inputs
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = f64::from(x);
        let y = f64::from(y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| AppError::InvalidStoredValue {
        column: column.to_string(),
        value: value.to_string(),
    })
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let id: String = row.try_get("id")?;
    let owner_kind: String = row.try_get("owner_kind")?;
    let owner_id: String = row.try_get("owner_id")?;
    let format: String = row.try_get("format")?;
    let status: String = row.try_get("status")?;
    let tags: String = row.try_get("tags")?;

    Ok(Document {
        id: parse_uuid(&id, "id")?,
        owner_kind: OwnerKind::parse(&owner_kind)?,
        owner_id: parse_uuid(&owner_id, "owner_id")?,
        collection: row.try_get("collection")?,
        title: row.try_get("title")?,
        filename: row.try_get("filename")?,
        format: DocFormat::parse(&format)?,
        size_bytes: row.try_get("size_bytes")?,
        status: IngestStatus::parse(&status)?,
        failure_reason: row.try_get("failure_reason")?,
        chunk_count: row.try_get("chunk_count")?,
        content_hash: row.try_get("content_hash")?,
        industry: row.try_get("industry")?,
        tags: serde_json::from_str(&tags)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use presail_common::config::DatabaseConfig;
    use presail_common::db;

    async fn test_pool(dir: &tempfile::TempDir) -> DbPool {
        let cfg = DatabaseConfig {
            path: dir.path().join("index.db").to_string_lossy().into_owned(),
            max_connections: 2,
            busy_timeout_secs: 1,
        };
        let pool = db::connect(&cfg).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn new_doc(filename: &str) -> NewDocument {
        NewDocument {
            owner_kind: OwnerKind::CaseStudy,
            owner_id: Uuid::new_v4(),
            title: "Churn reduction at Acme".into(),
            filename: filename.into(),
            format: DocFormat::Pdf,
            size_bytes: 1024,
            content_hash: "deadbeef".into(),
            industry: Some("retail".into()),
            tags: vec!["churn".into()],
        }
    }

    fn chunk(document_id: Uuid, ordinal: i32, content: &str) -> ChunkRecord {
        ChunkRecord {
            id: ChunkRecord::deterministic_id(document_id, ordinal, content),
            document_id,
            ordinal,
            content: content.to_string(),
            token_count: (content.len() / 4) as i32,
            start_pos: 0,
            end_pos: content.len() as i64,
            page_start: Some(1),
            page_end: Some(1),
            content_hash: ChunkRecord::hash_content(content),
        }
    }

    #[tokio::test]
    async fn test_reupload_keeps_document_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(test_pool(&dir).await);

        let new = new_doc("acme.pdf");
        let first = store.upsert(&new).await.unwrap();
        store.mark_processed(first.id, 7).await.unwrap();

        let second = store.upsert(&new).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, IngestStatus::Pending);
        assert_eq!(second.collection, "case_studies");
    }

    #[tokio::test]
    async fn test_upsert_replaces_not_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let store = DocumentStore::new(pool.clone());
        let index = VectorIndex::new(pool, 2);

        let doc = store.upsert(&new_doc("a.pdf")).await.unwrap();
        let c = chunk(doc.id, 0, "first version");
        index.upsert(&c, &[1.0, 0.0], "mock").await.unwrap();
        index.upsert(&c, &[1.0, 0.0], "mock").await.unwrap();

        let replacement = chunk(doc.id, 0, "second version");
        index.upsert(&replacement, &[0.0, 1.0], "mock").await.unwrap();

        let ids = index.chunk_ids(doc.id).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].0, replacement.id);
    }

    #[tokio::test]
    async fn test_query_orders_filters_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let store = DocumentStore::new(pool.clone());
        let index = VectorIndex::new(pool, 2);

        let doc = store.upsert(&new_doc("a.pdf")).await.unwrap();
        index.upsert(&chunk(doc.id, 0, "east"), &[1.0, 0.0], "mock").await.unwrap();
        index.upsert(&chunk(doc.id, 1, "north-east"), &[0.7071, 0.7071], "mock").await.unwrap();
        index.upsert(&chunk(doc.id, 2, "north"), &[0.0, 1.0], "mock").await.unwrap();

        let hits = index.query("case_studies", &[1.0, 0.0], 2, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "east");
        assert_eq!(hits[1].content, "north-east");
        assert!(hits[0].score >= hits[1].score);
        // "north" scores 0.0, below the floor
        let all = index.query("case_studies", &[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_query_empty_collection_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(test_pool(&dir).await, 2);
        let hits = index.query("case_studies", &[1.0, 0.0], 5, 0.1).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_blob_reports_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let store = DocumentStore::new(pool.clone());
        let index = VectorIndex::new(pool.clone(), 2);

        let doc = store.upsert(&new_doc("a.pdf")).await.unwrap();
        index.upsert(&chunk(doc.id, 0, "ok"), &[1.0, 0.0], "mock").await.unwrap();

        sqlx::query("UPDATE chunks SET embedding = X'0102'")
            .execute(&pool)
            .await
            .unwrap();

        let err = index.query("case_studies", &[1.0, 0.0], 5, 0.0).await.unwrap_err();
        match err {
            AppError::IndexCorrupted { collection, .. } => {
                assert_eq!(collection, "case_studies");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_trim_beyond_removes_stale_tail() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let store = DocumentStore::new(pool.clone());
        let index = VectorIndex::new(pool, 2);

        let doc = store.upsert(&new_doc("a.pdf")).await.unwrap();
        for ordinal in 0..4 {
            let c = chunk(doc.id, ordinal, &format!("chunk {ordinal}"));
            index.upsert(&c, &[1.0, 0.0], "mock").await.unwrap();
        }

        let trimmed = index.trim_beyond(doc.id, 2).await.unwrap();
        assert_eq!(trimmed, 2);
        assert_eq!(index.chunk_ids(doc.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_document_delete_cascades_to_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        let store = DocumentStore::new(pool.clone());
        let index = VectorIndex::new(pool, 2);

        let doc = store.upsert(&new_doc("a.pdf")).await.unwrap();
        index.upsert(&chunk(doc.id, 0, "text"), &[1.0, 0.0], "mock").await.unwrap();

        assert!(store.delete(doc.id).await.unwrap());
        assert!(index.chunk_ids(doc.id).await.unwrap().is_empty());
        assert!(store.get(doc.id).await.unwrap().is_none());
    }

    #[test]
    fn test_codec_round_trip() {
        let vector = vec![0.25f32, -1.5, 3.75];
        let blob = encode_embedding(&vector);
        assert_eq!(blob.len(), 12);
        assert_eq!(decode_embedding(&blob, 3).unwrap(), vector);
        assert!(decode_embedding(&blob, 4).is_err());
        assert!(decode_embedding(&blob[..8], 3).is_err());
    }

    #[test]
    fn test_cosine_similarity_guards() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        let same = cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]).unwrap();
        assert!((same - 1.0).abs() < 1e-9);
        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(orthogonal.abs() < 1e-9);
    }
}
