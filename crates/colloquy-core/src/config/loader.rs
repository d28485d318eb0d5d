//! Configuration loader for YAML files and environment resolution

use crate::config::types::*;
use crate::errors::ChatError;
use std::env;
use std::path::Path;
use tokio::fs;

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<ColloquyConfig, ChatError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            ChatError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content).await
    }

    /// Load configuration from a YAML string
    pub async fn from_str(content: &str) -> Result<ColloquyConfig, ChatError> {
        let mut config: ColloquyConfig = serde_yaml::from_str(content)
            .map_err(|e| ChatError::ConfigError(format!("Failed to parse YAML config: {}", e)))?;

        Self::resolve_environment(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn resolve_environment(config: &mut ColloquyConfig) {
        Self::resolve_llm_auth(&config.llm.provider, &mut config.llm.auth);
    }

    /// Resolve the API key: an explicit `api_key_env` wins over an inline key,
    /// and the provider's conventional variable is the last resort.
    fn resolve_llm_auth(provider: &LlmProvider, auth: &mut LlmAuth) {
        if let Some(env_var) = &auth.api_key_env {
            match env::var(env_var) {
                Ok(api_key) => auth.api_key = Some(api_key),
                Err(_) => log::warn!("Environment variable {} for the LLM API key is not set", env_var),
            }
        }

        if auth.api_key.is_none() && auth.api_key_env.is_none() {
            if let Some(env_var) = provider.default_api_key_env() {
                if let Ok(api_key) = env::var(env_var) {
                    log::debug!("Using LLM API key from {}", env_var);
                    auth.api_key = Some(api_key);
                }
            }
        }
    }
}
