//! Presail Search Library
//!
//! The persistent vector index (SQLite-backed chunk/embedding storage with
//! cosine nearest-neighbor queries) and the retriever that turns a query
//! string into ranked, deduplicated, citable passages.

pub mod retriever;
pub mod store;

pub use retriever::{RetrievedPassage, Retriever};
pub use store::{DocumentStore, NewDocument, ScoredChunk, VectorIndex};
