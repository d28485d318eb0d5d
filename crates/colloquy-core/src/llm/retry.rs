//! Retrying provider wrapper
//!
//! Repeats provider calls that fail with a transient error, sleeping with
//! capped exponential backoff and full jitter between attempts. Errors that
//! would fail the same way again are returned immediately.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::conversation::Conversation;
use crate::errors::ChatError;
use crate::llm::{Provider, ProviderResponse, ToolMetadata};
use crate::message::{RenderedMessage, ToolChoice};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Upper bound of the delay after the given failed attempt (1-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if !self.jitter {
            return ceiling;
        }
        ceiling.mul_f64(unit_random())
    }
}

/// Uniform sample in [0, 1] drawn from the random bits of a v4 UUID.
fn unit_random() -> f64 {
    let bits = (Uuid::new_v4().as_u128() >> 64) as u64;
    bits as f64 / u64::MAX as f64
}

pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_message(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError> {
        let mut attempt = 1;
        loop {
            match self
                .inner
                .get_message(system, messages, tools, tool_choice, max_tokens)
                .await
            {
                Ok(response) => {
                    if attempt > 1 {
                        log::info!("{} call succeeded on attempt {}", self.inner.name(), attempt);
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    log::warn!(
                        "{} call failed (attempt {}/{}), retrying in {}ms: {}",
                        self.inner.name(),
                        attempt,
                        self.policy.max_attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        log::error!(
                            "{} call failed after {} attempts: {}",
                            self.inner.name(),
                            attempt,
                            e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn token_count(
        &self,
        conversation: &Conversation,
        pending: Option<&str>,
    ) -> Result<usize, ChatError> {
        self.inner.token_count(conversation, pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedProvider;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: true,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff_ceiling(5), Duration::from_millis(8000));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(8000));
    }

    #[test]
    fn test_jittered_delay_within_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            for _ in 0..20 {
                assert!(policy.delay(attempt) <= policy.backoff_ceiling(attempt));
            }
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let scripted = Arc::new(ScriptedProvider::new());
        scripted.push_error(ChatError::ProviderUnavailable("overloaded".to_string()));
        scripted.push_error(ChatError::ParsingError("truncated body".to_string()));
        scripted.push_text("hello");

        let provider = RetryingProvider::new(scripted.clone(), fast_policy(4));
        let response = provider
            .get_message("sys", &[], &[], None, 100)
            .await
            .unwrap();
        assert_eq!(response.text.as_deref(), Some("hello"));
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let scripted = Arc::new(ScriptedProvider::new());
        for _ in 0..5 {
            scripted.push_error(ChatError::ProviderUnavailable("503".to_string()));
        }

        let provider = RetryingProvider::new(scripted.clone(), fast_policy(3));
        let err = provider
            .get_message("sys", &[], &[], None, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ProviderUnavailable(_)));
        assert_eq!(scripted.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let scripted = Arc::new(ScriptedProvider::new());
        scripted.push_error(ChatError::LLMError("401 unauthorized".to_string()));
        scripted.push_text("never reached");

        let provider = RetryingProvider::new(scripted.clone(), fast_policy(4));
        let err = provider
            .get_message("sys", &[], &[], None, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::LLMError(_)));
        assert_eq!(scripted.calls(), 1);
    }
}
