//! Ingestion pipeline
//!
//! The write path end to end: accept an upload (policy checks, raw-byte
//! storage, a pending document row), then process it (normalize, chunk,
//! embed in batches, upsert vectors one atomic statement at a time).
//! The document row doubles as the job record callers poll.
//!
//! Chunk identity is deterministic over (document, ordinal, content), so
//! processing an unchanged document rewrites identical rows and a
//! document that shrank gets its stale tail ordinals trimmed afterwards.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use presail_common::config::IngestionConfig;
use presail_common::embeddings::Embedder;
use presail_common::errors::{AppError, Result};
use presail_common::metrics::{
    CHUNKS_INDEXED, DOCUMENTS_INGESTED, INGESTION_DURATION_SECONDS, INGESTION_FAILURES,
};
use presail_common::models::{ChunkRecord, Document, OwnerKind};
use presail_search::store::{DocumentStore, NewDocument, VectorIndex};

use crate::blob::ObjectStore;
use crate::chunker::Chunker;
use crate::extract::{self, NormalizedText};

/// An upload crossing the ingestion boundary
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub owner_kind: OwnerKind,
    pub owner_id: Uuid,
    /// Display title; defaults to the filename stem when absent
    pub title: Option<String>,
    pub filename: String,
    pub declared_extension: String,
    pub bytes: Vec<u8>,
    pub industry: Option<String>,
    pub tags: Vec<String>,
}

pub struct IngestionPipeline {
    docs: DocumentStore,
    index: VectorIndex,
    blobs: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    cfg: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        docs: DocumentStore,
        index: VectorIndex,
        blobs: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        cfg: IngestionConfig,
    ) -> Self {
        Self {
            docs,
            index,
            blobs,
            embedder,
            chunker: Chunker::new(cfg.chunk_size, cfg.chunk_overlap),
            cfg,
        }
    }

    /// Accept an upload: policy checks, raw bytes into the object store,
    /// and a `pending` document row whose id doubles as the job id.
    #[instrument(skip(self, upload), fields(filename = %upload.filename))]
    pub async fn ingest(&self, upload: NewUpload) -> Result<Document> {
        let format = extract::validate_upload(
            &upload.declared_extension,
            upload.bytes.len(),
            self.cfg.max_document_bytes,
        )?;

        let title = upload.title.clone().unwrap_or_else(|| {
            upload
                .filename
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| upload.filename.clone())
        });

        let content_hash = hex::encode(Sha256::digest(&upload.bytes));
        let doc = self
            .docs
            .upsert(&NewDocument {
                owner_kind: upload.owner_kind,
                owner_id: upload.owner_id,
                title,
                filename: upload.filename.clone(),
                format,
                size_bytes: upload.bytes.len() as i64,
                content_hash,
                industry: upload.industry.clone(),
                tags: upload.tags.clone(),
            })
            .await?;

        self.blobs.put(doc.id, &upload.bytes).await?;

        info!(document_id = %doc.id, collection = %doc.collection, "Upload accepted");
        Ok(doc)
    }

    /// Run the processing pipeline for a stored document, recording the
    /// terminal status (`processed` with a chunk count, or `failed` with
    /// a reason) on the document row.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub async fn process(&self, document_id: Uuid) -> Result<Document> {
        let start = std::time::Instant::now();
        let doc = self
            .docs
            .get(document_id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound {
                id: document_id.to_string(),
            })?;

        let bytes = self.blobs.get(doc.id).await?;
        match self.index_document(&doc, &bytes).await {
            Ok(chunk_count) => {
                self.docs.mark_processed(doc.id, chunk_count).await?;
                metrics::counter!(DOCUMENTS_INGESTED).increment(1);
                metrics::histogram!(INGESTION_DURATION_SECONDS)
                    .record(start.elapsed().as_secs_f64());
                info!(chunk_count, "Document processed");
            }
            Err(err) => {
                // Oracle exhaustion and parse failures both land here;
                // the reason is what pollers see on the document row
                warn!(error = %err, "Document processing failed");
                self.docs.mark_failed(doc.id, &err.to_string()).await?;
                metrics::counter!(INGESTION_FAILURES).increment(1);
            }
        }

        self.docs
            .get(doc.id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound {
                id: doc.id.to_string(),
            })
    }

    /// Rebuild a document's index entries from its stored source bytes.
    /// This is the recovery path for a corrupted collection.
    pub async fn reindex(&self, document_id: Uuid) -> Result<Document> {
        info!(document_id = %document_id, "Rebuilding document from stored source");
        self.process(document_id).await
    }

    /// Remove a document, its indexed chunks, and its stored raw bytes
    pub async fn delete(&self, document_id: Uuid) -> Result<()> {
        let existed = self.docs.delete(document_id).await?;
        if !existed {
            return Err(AppError::DocumentNotFound {
                id: document_id.to_string(),
            });
        }
        self.blobs.delete(document_id).await?;
        Ok(())
    }

    /// Normalize, chunk, embed, and upsert. Returns the chunk count.
    async fn index_document(&self, doc: &Document, bytes: &[u8]) -> Result<i64> {
        let normalized = extract::normalize(bytes, doc.format.as_str(), self.cfg.max_document_bytes)?;

        let mut drafts = self.chunker.chunks(&normalized.text);
        let batch_size = self.cfg.embed_batch_size.max(1);
        let mut next_ordinal: i32 = 0;

        loop {
            let batch: Vec<_> = drafts.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }

            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;

            for (draft, vector) in batch.into_iter().zip(vectors) {
                let record = to_record(doc.id, &normalized, &draft);
                self.index
                    .upsert(&record, &vector, self.embedder.model_name())
                    .await?;
                next_ordinal = draft.ordinal + 1;
            }
        }

        // A shrunken re-ingest leaves stale rows past the new tail
        self.index.trim_beyond(doc.id, next_ordinal).await?;
        metrics::counter!(CHUNKS_INDEXED).increment(next_ordinal as u64);
        Ok(next_ordinal as i64)
    }
}

fn to_record(
    document_id: Uuid,
    normalized: &NormalizedText,
    draft: &crate::chunker::ChunkDraft,
) -> ChunkRecord {
    let (page_start, page_end) = normalized.page_range(draft.start_pos, draft.end_pos);
    ChunkRecord {
        id: ChunkRecord::deterministic_id(document_id, draft.ordinal, &draft.content),
        document_id,
        ordinal: draft.ordinal,
        content: draft.content.clone(),
        token_count: draft.token_count,
        start_pos: draft.start_pos as i64,
        end_pos: draft.end_pos as i64,
        page_start,
        page_end,
        content_hash: ChunkRecord::hash_content(&draft.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presail_common::config::DatabaseConfig;
    use presail_common::db;
    use presail_common::embeddings::MockEmbedder;
    use presail_common::models::IngestStatus;

    use crate::blob::FsObjectStore;
    use crate::extract::tests::docx_bytes;

    const DIM: usize = 16;

    async fn pipeline(dir: &tempfile::TempDir) -> IngestionPipeline {
        let cfg = DatabaseConfig {
            path: dir.path().join("p.db").to_string_lossy().into_owned(),
            max_connections: 2,
            busy_timeout_secs: 1,
        };
        let pool = db::connect(&cfg).await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        IngestionPipeline::new(
            DocumentStore::new(pool.clone()),
            VectorIndex::new(pool, DIM),
            Arc::new(FsObjectStore::new(dir.path().join("uploads")).unwrap()),
            Arc::new(MockEmbedder::new(DIM)),
            IngestionConfig {
                max_document_bytes: 1024 * 1024,
                chunk_size: 40,
                chunk_overlap: 8,
                embed_batch_size: 2,
            },
        )
    }

    fn upload(bytes: Vec<u8>, filename: &str, ext: &str) -> NewUpload {
        NewUpload {
            owner_kind: OwnerKind::CaseStudy,
            owner_id: Uuid::new_v4(),
            title: None,
            filename: filename.to_string(),
            declared_extension: ext.to_string(),
            bytes,
            industry: Some("logistics".into()),
            tags: vec!["routing".into()],
        }
    }

    #[tokio::test]
    async fn test_upload_to_processed_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;

        let bytes = docx_bytes(&[
            "Acme cut fleet idle time by a third in one quarter.",
            "The rollout covered two hundred depots across Europe.",
        ]);
        let doc = pipeline.ingest(upload(bytes, "acme-fleet.docx", "docx")).await.unwrap();
        assert_eq!(doc.status, IngestStatus::Pending);
        assert_eq!(doc.title, "acme-fleet");

        let doc = pipeline.process(doc.id).await.unwrap();
        assert_eq!(doc.status, IngestStatus::Processed);
        assert!(doc.chunk_count > 1);
    }

    #[tokio::test]
    async fn test_unchanged_reingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let bytes = docx_bytes(&["Same content both times, chunked identically."]);

        let first = pipeline.ingest(upload(bytes.clone(), "a.docx", "docx")).await.unwrap();
        let owner = first.owner_id;
        pipeline.process(first.id).await.unwrap();
        let before = pipeline.index.chunk_ids(first.id).await.unwrap();

        // Same owner re-uploads the same file
        let mut again = upload(bytes, "a.docx", "docx");
        again.owner_id = owner;
        let second = pipeline.ingest(again).await.unwrap();
        assert_eq!(first.id, second.id);
        pipeline.process(second.id).await.unwrap();
        let after = pipeline.index.chunk_ids(second.id).await.unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_shrunken_reupload_trims_stale_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let owner = Uuid::new_v4();

        let long = docx_bytes(&[
            "A long body of text that will produce a number of chunks when processed.",
            "More text to keep the chunker busy for several ordinals in a row here.",
        ]);
        let mut first = upload(long, "case.docx", "docx");
        first.owner_id = owner;
        let doc = pipeline.ingest(first).await.unwrap();
        let doc = pipeline.process(doc.id).await.unwrap();
        let long_count = doc.chunk_count;

        let short = docx_bytes(&["Tiny now."]);
        let mut second = upload(short, "case.docx", "docx");
        second.owner_id = owner;
        let doc = pipeline.ingest(second).await.unwrap();
        let doc = pipeline.process(doc.id).await.unwrap();

        assert!(doc.chunk_count < long_count);
        let stored = pipeline.index.chunk_ids(doc.id).await.unwrap();
        assert_eq!(stored.len() as i64, doc.chunk_count);
    }

    #[tokio::test]
    async fn test_rejects_disallowed_extension_before_storing() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let err = pipeline
            .ingest(upload(b"plain".to_vec(), "notes.txt", "txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn test_rejects_oversized_upload() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let mut big = upload(vec![0u8; 2 * 1024 * 1024], "big.pdf", "pdf");
        big.title = Some("big".into());
        let err = pipeline.ingest(big).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_document_ends_failed_with_reason() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;

        let doc = pipeline
            .ingest(upload(b"this is not a pdf".to_vec(), "broken.pdf", "pdf"))
            .await
            .unwrap();
        let doc = pipeline.process(doc.id).await.unwrap();

        assert_eq!(doc.status, IngestStatus::Failed);
        assert!(doc.failure_reason.is_some());
        assert_eq!(doc.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_delete_removes_document_and_blob() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&dir).await;
        let doc = pipeline
            .ingest(upload(docx_bytes(&["bye"]), "bye.docx", "docx"))
            .await
            .unwrap();

        pipeline.delete(doc.id).await.unwrap();
        assert!(pipeline.docs.get(doc.id).await.unwrap().is_none());
        assert!(matches!(
            pipeline.delete(doc.id).await.unwrap_err(),
            AppError::DocumentNotFound { .. }
        ));
    }
}
