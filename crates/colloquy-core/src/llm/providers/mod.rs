//! LLM provider implementations
//!
//! Each adapter implements [`Provider`] for one backend. [`create_provider`]
//! picks the adapter named in the configuration and wraps it in a
//! [`RetryingProvider`].

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProvider, RetryConfig};
use crate::errors::ChatError;
use crate::llm::{Provider, RetryPolicy, RetryingProvider};

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;

/// Create a retrying provider based on the LLM configuration
pub fn create_provider(
    config: &LlmConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn Provider>, ChatError> {
    let inner = match &config.provider {
        LlmProvider::OpenAI => openai::create_provider(config)?,
        LlmProvider::Anthropic => anthropic::create_provider(config)?,
        LlmProvider::Gemini => gemini::create_provider(config)?,
        LlmProvider::Custom => {
            let base_url = config.base_url.as_deref().ok_or_else(|| {
                ChatError::ConfigError("Custom provider requires llm.base_url".to_string())
            })?;
            openai::create_custom_provider(config, base_url)?
        }
    };
    log::info!(
        "Using {} provider with model {} ({} attempts per call)",
        inner.name(),
        config.model,
        retry.max_attempts
    );
    Ok(Arc::new(RetryingProvider::new(inner, RetryPolicy::from(retry))))
}

/// Get the default model for a provider if none is specified
pub fn get_default_model(provider: &LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAI => "gpt-4o-mini",
        LlmProvider::Anthropic => "claude-3-5-sonnet-latest",
        LlmProvider::Gemini => "gemini-1.5-flash",
        LlmProvider::Custom => "gpt-4o-mini",
    }
}

/// The configured key, or the value of the configured key variable.
pub(crate) fn resolve_api_key(config: &LlmConfig, label: &str) -> Result<String, ChatError> {
    config
        .auth
        .api_key
        .clone()
        .or_else(|| {
            config
                .auth
                .api_key_env
                .as_ref()
                .and_then(|env_var| std::env::var(env_var).ok())
        })
        .ok_or_else(|| {
            ChatError::ConfigError(format!(
                "No API key found for {}. Set api_key or api_key_env",
                label
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmAuth, ModelParameters};

    fn config(provider: LlmProvider, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            model: "some-model".to_string(),
            base_url: None,
            parameters: ModelParameters::default(),
            auth: LlmAuth {
                api_key: api_key.map(str::to_string),
                api_key_env: None,
            },
        }
    }

    #[test]
    fn test_create_each_provider() {
        let retry = RetryConfig::default();
        for (provider, name) in [
            (LlmProvider::OpenAI, "openai"),
            (LlmProvider::Anthropic, "anthropic"),
            (LlmProvider::Gemini, "gemini"),
        ] {
            let created = create_provider(&config(provider, Some("key")), &retry).unwrap();
            assert_eq!(created.name(), name);
        }
    }

    #[test]
    fn test_custom_provider_without_key() {
        let mut custom = config(LlmProvider::Custom, None);
        custom.base_url = Some("http://localhost:11434/v1".to_string());
        let created = create_provider(&custom, &RetryConfig::default()).unwrap();
        assert_eq!(created.name(), "openai");

        custom.base_url = None;
        let err = create_provider(&custom, &RetryConfig::default()).err().unwrap();
        assert!(matches!(err, ChatError::ConfigError(_)));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = create_provider(&config(LlmProvider::OpenAI, None), &RetryConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::ConfigError(_)));
    }
}
