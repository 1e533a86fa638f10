//! Bounded retry with exponential backoff for oracle calls
//!
//! One policy object is shared by the embedding and generation clients so
//! both oracles degrade the same way: transient failures (timeouts, connection
//! resets, HTTP 429/5xx) are retried up to a bounded attempt count with
//! exponentially growing delays; everything else fails fast.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::config::RetryConfig;

/// How a failed attempt should be treated by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth retrying after a backoff delay
    Transient,
    /// Retrying cannot help (bad request, auth failure, malformed response)
    Permanent,
}

/// Implemented by errors the policy knows how to classify
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// A single failed call to an out-of-process oracle
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed oracle response: {reason}")]
    Malformed { reason: String },
}

impl Retryable for OracleError {
    fn retry_class(&self) -> RetryClass {
        match self {
            // Network-level failures are assumed recoverable
            OracleError::Transport(_) => RetryClass::Transient,
            // 429 and 5xx recover; other status codes will not change on retry
            OracleError::Status { status, .. } => {
                if *status == 429 || *status >= 500 {
                    RetryClass::Transient
                } else {
                    RetryClass::Permanent
                }
            }
            OracleError::Malformed { .. } => RetryClass::Permanent,
        }
    }
}

/// Bounded exponential-backoff retry policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts, first try included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(cfg.max_attempts, cfg.base_delay(), cfg.max_delay())
    }

    /// Delay before retry number `retry` (0-based), doubling each time
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts
    /// run out. The final error is returned unchanged so callers can wrap
    /// it into their own taxonomy.
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, mut operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    let transient = err.retry_class() == RetryClass::Transient;
                    if !transient || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt - 1);
                    warn!(
                        operation = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient oracle failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
