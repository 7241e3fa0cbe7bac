//! LLM integration.
//!
//! The rest of the crate depends only on the `LlmProvider` trait. The one
//! concrete backend is rig-core's OpenAI chat-completions client, bridged by
//! `RigAdapter` and wrapped in a retrying decorator.

pub mod provider;
pub mod reasoning;
pub mod retry;
mod rig_adapter;

pub use provider::*;
pub use reasoning::{Reasoning, ReasoningContext, RespondOutput, RespondResult, TokenUsage};
pub use retry::{RetryConfig, RetryProvider};
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url =
            std::env::var("TASKHIVE_LLM_BASE_URL").unwrap_or_else(|_| defaults.base_url.clone());
        let api_key = std::env::var("TASKHIVE_LLM_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        let model = std::env::var("TASKHIVE_LLM_MODEL").unwrap_or_else(|_| defaults.model.clone());

        let timeout_secs: u64 = std::env::var("TASKHIVE_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.timeout.as_secs());

        let max_retries: u32 = std::env::var("TASKHIVE_LLM_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        Self {
            base_url,
            api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let api_key = config
        .api_key
        .as_ref()
        .map(|k| k.expose_secret().to_string())
        .unwrap_or_default();
    let client: openai::Client = openai::Client::builder()
        .api_key(&api_key)
        .base_url(&config.base_url)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: "openai".to_string(),
            reason: format!("Failed to create OpenAI client: {e}"),
        })?;

    let model = client.completions_api().completion_model(&config.model);
    tracing::info!(base_url = %config.base_url, model = %config.model, "Using OpenAI-compatible LLM");

    let adapter = RigAdapter::new(model, &config.model).with_timeout(config.timeout);
    let retry = RetryConfig {
        max_retries: config.max_retries,
        ..RetryConfig::default()
    };
    Ok(Arc::new(RetryProvider::new(Arc::new(adapter), retry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_without_key_still_constructs() {
        // Auth failures only surface when a request is made.
        let config = LlmConfig {
            model: "gpt-4o".to_string(),
            ..LlmConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.max_retries, 2);
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:1/v1".to_string(),
            api_key: Some(SecretString::from("sk-test")),
            timeout: Duration::from_secs(5),
            max_retries: 0,
            ..LlmConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        let result = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await;
        assert!(result.is_err());
    }
}
