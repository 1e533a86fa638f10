//! Presail Ingestion Library
//!
//! The write path of the retrieval pipeline: normalize an uploaded
//! document to plain text, cut it into overlapping chunks, embed them,
//! and land the vectors in the index. Raw uploads are kept in an object
//! store so a corrupted collection can be rebuilt from source.

pub mod blob;
pub mod chunker;
pub mod extract;
pub mod pipeline;

pub use blob::{FsObjectStore, ObjectStore};
pub use chunker::{ChunkDraft, Chunker};
pub use extract::{normalize, NormalizedText, Section};
pub use pipeline::{IngestionPipeline, NewUpload};
