//! Retriever: query text in, ranked citable passages out
//!
//! Embeds the query, asks the vector index for an over-fetched candidate
//! set, drops everything below the score floor, caps how many passages a
//! single document may contribute, and attaches a human-readable citation
//! to each survivor. An empty result is a normal outcome, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use presail_common::config::RetrievalConfig;
use presail_common::embeddings::Embedder;
use presail_common::errors::Result;
use presail_common::metrics::{RETRIEVAL_DURATION_SECONDS, RETRIEVAL_QUERIES};
use presail_common::models::Citation;

use crate::store::{ScoredChunk, VectorIndex};

/// Over-fetch factor so the per-document cap does not starve the result set
const OVERFETCH: usize = 4;

/// A passage that cleared retrieval, ready for prompt assembly
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub title: String,
    pub content: String,
    /// Human-readable position within the source, e.g. "p. 3" or "section 2"
    pub locator: String,
    pub score: f32,
}

impl RetrievedPassage {
    /// Build the citation for this passage under marker index `index`
    pub fn citation(&self, index: usize) -> Citation {
        Citation {
            index,
            document_id: self.document_id,
            title: self.title.clone(),
            locator: self.locator.clone(),
            quote: Citation::excerpt(&self.content, 200),
            score: self.score,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    cfg: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: VectorIndex, cfg: RetrievalConfig) -> Self {
        Self { embedder, index, cfg }
    }

    /// Retrieve with the configured defaults
    pub async fn retrieve(&self, query_text: &str, collection: &str) -> Result<Vec<RetrievedPassage>> {
        self.retrieve_with(query_text, collection, self.cfg.top_k, self.cfg.min_score)
            .await
    }

    /// Retrieve with explicit `k` and `min_score`
    #[instrument(skip(self, query_text), fields(collection, k, min_score))]
    pub async fn retrieve_with(
        &self,
        query_text: &str,
        collection: &str,
        k: usize,
        min_score: f32,
    ) -> Result<Vec<RetrievedPassage>> {
        let start = std::time::Instant::now();
        metrics::counter!(RETRIEVAL_QUERIES).increment(1);

        let query_vector = self.embedder.embed(query_text).await?;
        let candidates = self
            .index
            .query(collection, &query_vector, k * OVERFETCH, min_score)
            .await?;

        let passages = self.cap_per_document(candidates, k);

        metrics::histogram!(RETRIEVAL_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        debug!(
            collection,
            returned = passages.len(),
            "Retrieval complete"
        );
        Ok(passages)
    }

    /// Walk the ranked candidates keeping at most `per_document_cap`
    /// passages per source document, stopping at `k` survivors.
    fn cap_per_document(&self, candidates: Vec<ScoredChunk>, k: usize) -> Vec<RetrievedPassage> {
        let cap = self.cfg.per_document_cap.max(1);
        let mut per_document: HashMap<Uuid, usize> = HashMap::new();
        let mut survivors = Vec::with_capacity(k);

        for chunk in candidates {
            let seen = per_document.entry(chunk.document_id).or_insert(0);
            if *seen >= cap {
                continue;
            }
            *seen += 1;
            survivors.push(into_passage(chunk));
            if survivors.len() == k {
                break;
            }
        }
        survivors
    }
}

fn into_passage(chunk: ScoredChunk) -> RetrievedPassage {
    RetrievedPassage {
        chunk_id: chunk.chunk_id,
        document_id: chunk.document_id,
        title: chunk.title,
        locator: locator(chunk.page_start, chunk.page_end, chunk.ordinal),
        content: chunk.content,
        score: chunk.score,
    }
}

/// Format the passage position: pages when the source format has them,
/// section number (1-based ordinal) otherwise.
fn locator(page_start: Option<i32>, page_end: Option<i32>, ordinal: i32) -> String {
    match (page_start, page_end) {
        (Some(start), Some(end)) if end > start => format!("pp. {start}-{end}"),
        (Some(page), _) => format!("p. {page}"),
        _ => format!("section {}", ordinal + 1),
    }
}
