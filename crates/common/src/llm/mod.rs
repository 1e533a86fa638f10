//! Generation oracle abstraction
//!
//! Chat-completion clients behind the same seam as the embedders: an
//! OpenAI-compatible HTTP implementation for production and a scripted
//! mock for tests. Shares the bounded retry policy and concurrency cap
//! discipline with the embedding client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::retry::{OracleError, RetryPolicy};

/// Role of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in a chat-completion prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Trait for text generation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a completion for the given messages
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat-completion client
pub struct HttpChatModel {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    policy: RetryPolicy,
    limiter: Arc<Semaphore>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl HttpChatModel {
    pub fn new(cfg: &GenerationConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "generation.api_key is required for the openai provider".into(),
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
            policy: RetryPolicy::from_config(&cfg.retry),
            limiter: Arc::new(Semaphore::new(cfg.max_concurrent_requests.max(1))),
        })
    }

    async fn make_request(&self, messages: &[ChatMessage]) -> std::result::Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.2,
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

        let parsed: ChatResponse = response.json().await.map_err(|e| OracleError::Malformed {
            reason: format!("invalid completion payload: {e}"),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| OracleError::Malformed {
                reason: "completion contained no choices".into(),
            })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| AppError::Internal {
                message: "generation concurrency limiter closed".into(),
            })?;

        self.policy
            .run("complete", || self.make_request(messages))
            .await
            .map_err(|e| AppError::GenerationUnavailable {
                reason: e.to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted chat model for tests and offline development.
///
/// Returns a fixed reply and records every prompt it was given.
pub struct MockChatModel {
    reply: String,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        Ok(self.reply.clone())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Create a chat model based on configuration
pub fn create_chat_model(cfg: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(HttpChatModel::new(cfg)?)),
        "mock" => Ok(Arc::new(MockChatModel::new(
            "I could not reach a configured model.",
        ))),
        other => Err(AppError::Configuration {
            message: format!("unknown generation provider: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;

    #[tokio::test]
    async fn test_mock_records_prompts() {
        let model = MockChatModel::new("grounded answer [1]");
        let messages = vec![
            ChatMessage::system("answer from context"),
            ChatMessage::user("what did the churn case study show?"),
        ];
        let reply = model.complete(&messages).await.unwrap();
        assert_eq!(reply, "grounded answer [1]");

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0].role, ChatRole::System);
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
    }

    #[test]
    fn test_factory_requires_api_key_for_openai() {
        let cfg = GenerationConfig {
            provider: "openai".into(),
            api_key: None,
            ..GenerationConfig::default()
        };
        assert!(create_chat_model(&cfg).is_err());
    }
}
