//! Inference endpoint client
//!
//! The scheduler only needs "POST this JSON, give me the body back"; the
//! HTTP implementation adds per-request timeouts and linear backoff retry.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::InferenceConfig;
use crate::errors::InferenceError;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// POST `body` as JSON to `endpoint` and return the raw response body
    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<Bytes, InferenceError>;
}

/// Retry policy: `retry` extra attempts, sleeping `attempt × backoff` before each
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retry: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.retry.saturating_add(1)
    }

    /// Delay before `attempt` (0-based); the first attempt is immediate
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl From<&InferenceConfig> for RetryPolicy {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            retry: config.retry,
            backoff: config.backoff,
        }
    }
}

pub struct HttpInferenceClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpInferenceClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            policy: RetryPolicy::from(config),
        })
    }

    async fn post_once(&self, endpoint: &str, body: &serde_json::Value) -> Result<Bytes, InferenceError> {
        let response = self.client.post(endpoint).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<Bytes, InferenceError> {
        let attempts = self.policy.total_attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt);
                debug!(
                    "Retrying inference call to {} in {:?} (attempt {}/{})",
                    endpoint,
                    delay,
                    attempt + 1,
                    attempts
                );
                tokio::time::sleep(delay).await;
            }

            match self.post_once(endpoint, body).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(
                        "Inference attempt {}/{} to {} failed: {}",
                        attempt + 1,
                        attempts,
                        endpoint,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(InferenceError::Exhausted {
            attempts,
            last: last_error,
        })
    }
}
