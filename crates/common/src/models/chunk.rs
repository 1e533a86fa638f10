//! Chunk model
//!
//! The unit of embedding and retrieval. Chunk identity is derived from
//! (document, ordinal, content) so an unchanged re-ingest produces the
//! same ids and the index upsert is a no-op rather than a duplicate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A bounded text span cut from a normalized document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position within the document, starting at 0
    pub ordinal: i32,
    pub content: String,
    /// Estimated tokens (chars / 4)
    pub token_count: i32,
    /// Character offsets into the normalized text
    pub start_pos: i64,
    pub end_pos: i64,
    /// Page range, when the source format has pages
    pub page_start: Option<i32>,
    pub page_end: Option<i32>,
    pub content_hash: String,
}

impl ChunkRecord {
    /// Deterministic id: UUIDv8 over sha256(document_id, ordinal, content)
    pub fn deterministic_id(document_id: Uuid, ordinal: i32, content: &str) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(ordinal.to_le_bytes());
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::new_v8(bytes)
    }

    /// Content hash stored beside the chunk for change detection
    pub fn hash_content(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }
}
