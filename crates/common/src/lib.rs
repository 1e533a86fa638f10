//! Presail Common Library
//!
//! Shared code for the Presail backend crates:
//! - Configuration management
//! - Error types and handling
//! - Database pool and schema
//! - Domain models (documents, chunks, proposals, review events)
//! - Embedding and chat-model client abstractions
//! - Retry policy for out-of-process oracle calls
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod retry;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::ChatModel;
pub use retry::RetryPolicy;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
