//! Retry decorator for any `LlmProvider`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, ToolCompletionRequest,
    ToolCompletionResponse,
};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with up to 10% jitter, capped at `max_delay_ms`.
    fn compute_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let jitter = base * 0.1 * rand::thread_rng().gen_range(0.0..1.0);
        let delay = (base + jitter) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Wraps a provider and retries transient failures (network, 429, 5xx).
pub struct RetryProvider {
    inner: Arc<dyn LlmProvider>,
    config: RetryConfig,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    fn delay_for(&self, error: &LlmError, attempt: u32) -> Duration {
        match error {
            LlmError::RateLimited {
                retry_after: Some(after),
                ..
            } => (*after).min(Duration::from_millis(self.config.max_delay_ms)),
            _ => self.config.compute_delay(attempt),
        }
    }

    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.max_retries && e.is_retryable() => {
                    let delay = self.delay_for(&e, attempt);
                    warn!(
                        model = self.inner.model_name(),
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying LLM request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LlmProvider for RetryProvider {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.with_retries(|| self.inner.complete(request.clone()))
            .await
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        self.with_retries(|| self.inner.complete_with_tools(request.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::llm::provider::{ChatMessage, FinishReason};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> LlmError,
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _r: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)());
            }
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }

        async fn complete_with_tools(
            &self,
            _r: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            unreachable!()
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    fn server_error() -> LlmError {
        LlmError::ServerError {
            provider: "test".into(),
            status: 503,
            body: String::new(),
        }
    }

    fn auth_error() -> LlmError {
        LlmError::AuthFailed {
            provider: "test".into(),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let inner = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: server_error,
        });
        let provider = RetryProvider::new(inner.clone(), fast());
        let resp = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: server_error,
        });
        let provider = RetryProvider::new(inner.clone(), fast());
        let result = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(matches!(result, Err(LlmError::ServerError { .. })));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_are_not_retried() {
        let inner = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: auth_error,
        });
        let provider = RetryProvider::new(inner.clone(), fast());
        let result = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn compute_delay_respects_max() {
        let config = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 500,
            max_delay_ms: 2000,
            backoff_multiplier: 10.0,
        };
        assert!(config.compute_delay(5) <= Duration::from_millis(2000));
    }
}
