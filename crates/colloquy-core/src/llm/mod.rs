//! Language model provider abstractions and integrations.
//!
//! Defines the [`Provider`] contract the orchestration loop talks to, and
//! implementations for Anthropic, OpenAI (and compatible endpoints) and Gemini.
//! Adapters normalize every backend to the same shape: at most one tool call
//! per response, with its id, name and input always populated together.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Conversation;
use crate::errors::ChatError;
use crate::message::{RenderedMessage, ToolCall, ToolChoice};

pub mod providers;
pub mod retry;
pub mod tokens;

pub use providers::create_provider;
pub use retry::{RetryPolicy, RetryingProvider};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One normalized provider reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub text: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub stop_reason: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    async fn get_message(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError>;

    /// Tokens the conversation would cost as input, plus `pending` text if given.
    async fn token_count(
        &self,
        conversation: &Conversation,
        pending: Option<&str>,
    ) -> Result<usize, ChatError>;
}

/// Splits response text blocks and tool invocations the way every adapter
/// reports them: text joined, first tool call kept, extras logged and dropped.
pub(crate) fn collapse_blocks(
    provider: &str,
    texts: Vec<String>,
    mut tool_calls: Vec<ToolCall>,
) -> (Option<String>, Option<ToolCall>) {
    let text = texts
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let text = if text.is_empty() { None } else { Some(text) };

    if tool_calls.len() > 1 {
        let dropped: Vec<&str> = tool_calls[1..].iter().map(|c| c.name.as_str()).collect();
        log::warn!(
            "{} returned {} tool calls; keeping '{}' and dropping {:?}",
            provider,
            tool_calls.len(),
            tool_calls[0].name,
            dropped
        );
        tool_calls.truncate(1);
    }

    (text, tool_calls.pop())
}
