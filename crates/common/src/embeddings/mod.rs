//! Embedding oracle abstraction
//!
//! A unified interface over embedding providers:
//! - OpenAI-compatible HTTP endpoints (`/embeddings`)
//! - A deterministic mock for tests and offline development
//!
//! The HTTP client shares the bounded retry policy with the generation
//! client and caps in-flight requests with a semaphore so a burst of
//! ingestion jobs cannot overwhelm the oracle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::retry::{OracleError, RetryPolicy};

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in one oracle round trip.
    /// Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embedding client
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    policy: RetryPolicy,
    limiter: Arc<Semaphore>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "embedding.api_key is required for the openai provider".into(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: cfg
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: cfg.model.clone(),
            dimension: cfg.dimension,
            policy: RetryPolicy::from_config(&cfg.retry),
            limiter: Arc::new(Semaphore::new(cfg.max_concurrent_requests.max(1))),
        })
    }

    async fn make_request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, OracleError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| OracleError::Malformed {
            reason: format!("invalid embedding payload: {e}"),
        })?;

        if parsed.data.len() != texts.len() {
            return Err(OracleError::Malformed {
                reason: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        // Restore input order; some gateways return items out of order
        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimension {
                return Err(OracleError::Malformed {
                    reason: format!(
                        "dimension mismatch: expected {}, got {}",
                        self.dimension,
                        item.embedding.len()
                    ),
                });
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| AppError::Internal {
                message: "embedding concurrency limiter closed".into(),
            })?;

        self.policy
            .run("embed", || self.make_request(texts))
            .await
            .map_err(|e| AppError::EmbeddingUnavailable {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut embeddings = self.request_with_retry(&texts).await?;
        embeddings.pop().ok_or_else(|| AppError::EmbeddingUnavailable {
            reason: "oracle returned no embedding".into(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_with_retry(texts).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for tests and offline development.
///
/// Same text always produces the same unit-length vector, which keeps
/// re-ingestion idempotent end to end. Not semantically meaningful.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let seed = Sha256::digest(text.as_bytes());

        let mut values = Vec::with_capacity(self.dimension);
        let mut block: u32 = 0;
        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();
            for window in digest.chunks_exact(4) {
                if values.len() == self.dimension {
                    break;
                }
                let raw = u32::from_le_bytes([window[0], window[1], window[2], window[3]]);
                // Map to [-1, 1]
                values.push((raw as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
            }
            block += 1;
        }

        // Normalize so cosine scores behave like a real model's output
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut values {
                *v /= norm;
            }
        } else if let Some(first) = values.first_mut() {
            *first = 1.0;
        }
        values
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(cfg: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(HttpEmbedder::new(cfg)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(cfg.dimension))),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    #[tokio::test]
    async fn test_mock_embedder_dimension() {
        let embedder = MockEmbedder::new(768);
        let embedding = embedder.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("case study about churn").await.unwrap();
        let b = embedder.embed("case study about churn").await.unwrap();
        assert_eq!(a, b);

        let c = embedder.embed("something else entirely").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_embeddings_are_unit_length() {
        let embedder = MockEmbedder::new(96);
        let v = embedder.embed("normalize me").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {norm}");
    }

    #[tokio::test]
    async fn test_mock_batch_preserves_order() {
        let embedder = MockEmbedder::new(32);
        let texts = vec!["first".to_string(), "second".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("first").await.unwrap());
        assert_eq!(batch[1], embedder.embed("second").await.unwrap());
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let cfg = EmbeddingConfig {
            provider: "quantum".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&cfg).is_err());
    }

    #[test]
    fn test_factory_requires_api_key_for_openai() {
        let cfg = EmbeddingConfig {
            provider: "openai".into(),
            api_key: None,
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&cfg).is_err());
    }
}
