//! Error types for conversation orchestration
//!
//! Every failure mode of the engine is a variant of [`ChatError`]. Failures are
//! grouped by where they originate (conversation model, tool registration, tool
//! execution, provider backend, configuration) so callers can decide locally
//! whether to recover, retry, or surface the error as a failed turn.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("Conversation invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Invalid tool definition for '{tool_name}': {message}")]
    ToolDefinition { tool_name: String, message: String },
    #[error("Tool execution failed for '{tool_name}': {message}")]
    ToolExecution { tool_name: String, message: String },
    #[error("LLM interaction failed: {0}")]
    LLMError(String),
    #[error("LLM provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Conversation store error: {0}")]
    StoreError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ChatError {
    pub fn tool_definition(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        ChatError::ToolDefinition {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Whether a provider call that failed with this error may succeed if repeated.
    ///
    /// Timeouts, overload and rate limiting surface as `ProviderUnavailable`;
    /// a response body the adapter could not make sense of is a `ParsingError`.
    /// Both are transient. Everything else (bad credentials, rejected requests,
    /// local errors) fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::ProviderUnavailable(_) | ChatError::ParsingError(_)
        )
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ChatError::ProviderUnavailable(err.to_string())
        } else if err.is_decode() {
            ChatError::ParsingError(err.to_string())
        } else {
            ChatError::LLMError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::ParsingError(err.to_string())
    }
}

/// Maps a non-success HTTP status from a provider backend to an error.
///
/// 408, 429, 5xx and Anthropic's 529 ("overloaded") are transient.
pub fn provider_status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> ChatError {
    let message = format!("{} API request failed with status {}: {}", provider, status, body);
    let code = status.as_u16();
    if code == 408 || code == 429 || code == 529 || status.is_server_error() {
        ChatError::ProviderUnavailable(message)
    } else {
        ChatError::LLMError(message)
    }
}
