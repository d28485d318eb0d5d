//! Configuration type definitions
//!
//! Every section except `llm` is optional in YAML and falls back to defaults,
//! so a minimal file only names a provider and a model.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ChatError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColloquyConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    /// Endpoint for the `custom` provider; ignored by the others.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default)]
    pub auth: LlmAuth,
}

/// LLM provider types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
    Gemini,
    /// Any endpoint speaking the OpenAI chat completions protocol, at `llm.base_url`.
    Custom,
}

impl LlmProvider {
    /// Environment variable consulted when no key or key variable is configured.
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
            LlmProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProvider::Gemini => Some("GEMINI_API_KEY"),
            LlmProvider::Custom => Some("CUSTOM_API_KEY"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParameters {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Caps the per-call budget from `orchestration.max_tokens` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
            top_p: default_top_p(),
            anthropic_version: None,
            stop_sequences: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmAuth {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Propagate tool failures and report full error text to clients.
    #[serde(default)]
    pub debug: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_calls: default_max_tool_calls(),
            max_tokens: default_max_tokens(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Retrieval tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_adjacent_window")]
    pub adjacent_window: usize,
    /// Largest input, conversation included, a whole-document read may produce.
    #[serde(default = "default_document_token_ceiling")]
    pub document_token_ceiling: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            adjacent_window: default_adjacent_window(),
            document_token_ceiling: default_document_token_ceiling(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<log::LevelFilter, ChatError> {
        self.level.parse::<log::LevelFilter>().map_err(|_| {
            ChatError::ConfigError(format!(
                "Invalid log level '{}'. Expected one of: off, error, warn, info, debug, trace",
                self.level
            ))
        })
    }
}

fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 1.0 }
fn default_system_prompt() -> String { "You are a helper.".to_string() }
fn default_max_tool_calls() -> usize { 5 }
fn default_max_tokens() -> u32 { 4096 }
fn default_tool_timeout() -> u64 { 15 }
fn default_pool_size() -> usize { 10 }
fn default_max_attempts() -> u32 { 4 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 8000 }
fn default_top_k() -> usize { 5 }
fn default_adjacent_window() -> usize { 2 }
fn default_document_token_ceiling() -> usize { 20000 }
fn default_log_level() -> String { "info".to_string() }

impl ColloquyConfig {
    /// Token budget for one provider call.
    pub fn max_tokens(&self) -> u32 {
        match self.llm.parameters.max_tokens {
            Some(cap) => cap.min(self.orchestration.max_tokens),
            None => self.orchestration.max_tokens,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.llm.model.trim().is_empty() {
            return Err(ChatError::ConfigError("LLM model cannot be empty".to_string()));
        }

        if self.llm.provider == LlmProvider::Custom {
            let base_url = self.llm.base_url.as_deref().unwrap_or_default();
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ChatError::ConfigError(format!(
                    "Custom provider needs llm.base_url set to an http(s) URL, got '{}'",
                    base_url
                )));
            }
        }

        if !(0.0..=2.0).contains(&self.llm.parameters.temperature) {
            return Err(ChatError::ConfigError(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.parameters.temperature
            )));
        }

        if self.orchestration.max_tokens == 0 {
            return Err(ChatError::ConfigError("orchestration.max_tokens must be greater than 0".to_string()));
        }

        if self.tools.timeout_secs == 0 {
            return Err(ChatError::ConfigError("tools.timeout_secs must be greater than 0".to_string()));
        }

        if self.tools.pool_size == 0 {
            return Err(ChatError::ConfigError("tools.pool_size must be greater than 0".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(ChatError::ConfigError("retry.max_attempts must be at least 1".to_string()));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ChatError::ConfigError(format!(
                "retry.base_delay_ms ({}) cannot exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(ChatError::ConfigError("retrieval.top_k must be greater than 0".to_string()));
        }

        self.logging.level_filter()?;

        Ok(())
    }
}
