//! LLM call boundary.
//!
//! [`ModelClient`] is text in, text out, or a typed failure. An empty
//! string is a successful empty answer, never a failure.
//! [`GatedClient`] wraps any client with the per-process concurrency cap,
//! the requests-per-minute limiter and the call timeout.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::ModelConfig;
use crate::prompts::TemplateId;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("model client not configured: {0}")]
    NotConfigured(String),
}

/// One model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub template: TemplateId,
    pub model: String,
    pub prompt: String,
}

impl ModelRequest {
    pub fn new(template: TemplateId, model: impl Into<String>, prompt: String) -> Self {
        Self {
            template,
            model: model.into(),
            prompt,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// Text of the first choice. An empty string is a successful, empty
/// answer; only a missing or non-string `content` is malformed.
fn completion_text(resp_json: &serde_json::Value) -> Result<String, ModelError> {
    resp_json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].message.content".into()))
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let start = Instant::now();
        let body = serde_json::json!({
            "model": request.model,
            "messages": [
                {"role": "user", "content": request.prompt}
            ],
            "temperature": 0.3
        });

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(start.elapsed())
            } else {
                ModelError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let resp_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

        let content = completion_text(&resp_json)?;

        tracing::debug!(
            template = %request.template,
            model = %request.model,
            chars = content.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model call complete"
        );
        Ok(content)
    }
}

/// Client used when no API key is available: every call fails visibly.
pub struct UnconfiguredClient {
    reason: String,
}

impl UnconfiguredClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ModelClient for UnconfiguredClient {
    async fn invoke(&self, _request: &ModelRequest) -> Result<String, ModelError> {
        Err(ModelError::NotConfigured(self.reason.clone()))
    }
}

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Concurrency cap, rate limit and timeout around an inner client.
///
/// A timeout is reported as [`ModelError::Timeout`] so callers treat it
/// exactly like any other failure.
pub struct GatedClient {
    inner: Arc<dyn ModelClient>,
    permits: Arc<Semaphore>,
    limiter: Option<Arc<DirectLimiter>>,
    timeout: Duration,
}

impl GatedClient {
    pub fn new(inner: Arc<dyn ModelClient>, max_concurrency: usize, requests_per_minute: u32, timeout: Duration) -> Self {
        let limiter = NonZeroU32::new(requests_per_minute)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            limiter,
            timeout,
        }
    }

    pub fn from_config(inner: Arc<dyn ModelClient>, config: &ModelConfig) -> Self {
        Self::new(
            inner,
            config.max_concurrency,
            config.requests_per_minute,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ModelClient for GatedClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ModelError::NotConfigured("model call gate closed".into()))?;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        match tokio::time::timeout(self.timeout, self.inner.invoke(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(template = %request.template, timeout = ?self.timeout, "Model call timed out");
                Err(ModelError::Timeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> ModelRequest {
        ModelRequest::new(TemplateId::IntelBrief, "m", "prompt".into())
    }

    #[tokio::test]
    async fn test_gated_client_passes_through() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke()
            .withf(|req| req.template == TemplateId::IntelBrief && req.prompt == "prompt")
            .times(1)
            .returning(|_| Ok("answer".to_string()));

        let gated = GatedClient::new(Arc::new(mock), 2, 0, Duration::from_secs(5));
        assert_eq!(gated.invoke(&request()).await.unwrap(), "answer");
    }

    #[tokio::test]
    async fn test_empty_answer_is_success() {
        let mut mock = MockModelClient::new();
        mock.expect_invoke().returning(|_| Ok(String::new()));
        let gated = GatedClient::new(Arc::new(mock), 1, 0, Duration::from_secs(5));
        assert_eq!(gated.invoke(&request()).await.unwrap(), "");
    }

    #[test]
    fn test_completion_text_keeps_empty_distinct_from_malformed() {
        let ok = serde_json::json!({"choices": [{"message": {"content": "brief"}}]});
        assert_eq!(completion_text(&ok).unwrap(), "brief");

        let empty = serde_json::json!({"choices": [{"message": {"content": ""}}]});
        assert_eq!(completion_text(&empty).unwrap(), "");

        let missing = serde_json::json!({"choices": []});
        assert!(matches!(completion_text(&missing), Err(ModelError::MalformedResponse(_))));
        let null = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert!(matches!(completion_text(&null), Err(ModelError::MalformedResponse(_))));
    }

    struct SlowClient;

    #[async_trait]
    impl ModelClient for SlowClient {
        async fn invoke(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok("late".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let gated = GatedClient::new(Arc::new(SlowClient), 1, 0, Duration::from_secs(300));
        let err = gated.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ModelError::Timeout(d) if d == Duration::from_secs(300)));
    }

    struct CountingClient {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for CountingClient {
        async fn invoke(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_capped() {
        let inner = Arc::new(CountingClient {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gated = Arc::new(GatedClient::new(inner.clone(), 2, 0, Duration::from_secs(5)));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let gated = gated.clone();
            handles.push(tokio::spawn(async move { gated.invoke(&request()).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(inner.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unconfigured_client_fails_visibly() {
        let client = UnconfiguredClient::new("POE_API_KEY not set");
        let err = client.invoke(&request()).await.unwrap_err();
        assert!(err.to_string().contains("POE_API_KEY"));
    }
}
