//! Anthropic Claude provider
//!
//! Talks to the Messages API with native tools and `tool_choice`, and counts
//! tokens exactly through the `count_tokens` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{LlmConfig, ModelParameters};
use crate::conversation::Conversation;
use crate::errors::{provider_status_error, ChatError};
use crate::llm::providers::resolve_api_key;
use crate::llm::{collapse_blocks, Provider, ProviderResponse, ToolMetadata};
use crate::message::{RenderedMessage, Role, ToolCall, ToolChoice};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    parameters: ModelParameters,
}

#[derive(Debug, Serialize, PartialEq)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type")]
enum AnthropicContent {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct CountTokensRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
    model: Option<String>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicResponseContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    input_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        model: String,
        parameters: ModelParameters,
        api_base: Option<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: api_base.unwrap_or_else(|| ANTHROPIC_API_BASE.to_string()),
            model,
            parameters,
        }
    }

    /// Merges consecutive same-role messages into one turn, since the
    /// Messages API requires strict user/assistant alternation.
    fn convert_messages(&self, messages: &[RenderedMessage]) -> Vec<AnthropicMessage> {
        let mut converted: Vec<AnthropicMessage> = Vec::new();

        for message in messages {
            let role = match message.role {
                Role::Assistant => "assistant",
                Role::User | Role::Tool => "user",
            };
            let block = AnthropicContent::Text {
                text: message.content.clone(),
            };
            match converted.last_mut() {
                Some(last) if last.role == role => last.content.push(block),
                _ => converted.push(AnthropicMessage {
                    role,
                    content: vec![block],
                }),
            }
        }

        converted
    }

    fn convert_tools<'a>(&self, tools: &'a [ToolMetadata]) -> Vec<AnthropicTool<'a>> {
        tools
            .iter()
            .map(|tool| AnthropicTool {
                name: &tool.name,
                description: &tool.description,
                input_schema: &tool.input_schema,
            })
            .collect()
    }

    fn convert_tool_choice(tool_choice: &ToolChoice) -> Value {
        match tool_choice {
            ToolChoice::Auto => json!({"type": "auto"}),
            ToolChoice::Any => json!({"type": "any"}),
            ToolChoice::None => json!({"type": "none"}),
            ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
        }
    }

    fn convert_response(&self, response: AnthropicResponse) -> ProviderResponse {
        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                AnthropicResponseContent::Text { text } => texts.push(text),
                AnthropicResponseContent::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, input })
                }
                AnthropicResponseContent::Other => {}
            }
        }

        let (text, tool_call) = collapse_blocks("Anthropic", texts, tool_calls);
        ProviderResponse {
            text,
            tool_call,
            stop_reason: response.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            model: response.model.or_else(|| Some(self.model.clone())),
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<String, ChatError> {
        let anthropic_version = self
            .parameters
            .anthropic_version
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);

        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", anthropic_version)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<AnthropicErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(provider_status_error("Anthropic", status, &detail));
        }
        Ok(text)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn get_message(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens,
            messages: self.convert_messages(messages),
            system,
            temperature: if self.parameters.temperature > 0.0 {
                Some(self.parameters.temperature)
            } else {
                None
            },
            top_p: if self.parameters.top_p < 1.0 {
                Some(self.parameters.top_p)
            } else {
                None
            },
            stop_sequences: self.parameters.stop_sequences.clone(),
            tools: self.convert_tools(tools),
            tool_choice: if tools.is_empty() {
                None
            } else {
                tool_choice.map(Self::convert_tool_choice)
            },
        };

        log::debug!("Anthropic request: {} messages, {} tools", request.messages.len(), request.tools.len());
        let body = self.post("/v1/messages", &request).await?;
        let response: AnthropicResponse = serde_json::from_str(&body)?;
        Ok(self.convert_response(response))
    }

    async fn token_count(
        &self,
        conversation: &Conversation,
        pending: Option<&str>,
    ) -> Result<usize, ChatError> {
        let mut rendered = conversation.render();
        if let Some(text) = pending {
            rendered.push(RenderedMessage {
                role: Role::User,
                content: text.to_string(),
            });
        }
        if rendered.is_empty() {
            return Ok(0);
        }

        let request = CountTokensRequest {
            model: &self.model,
            messages: self.convert_messages(&rendered),
            system: &conversation.system,
        };
        let body = self.post("/v1/messages/count_tokens", &request).await?;
        let response: CountTokensResponse = serde_json::from_str(&body)?;
        Ok(response.input_tokens)
    }
}

/// Create an Anthropic provider from configuration
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>, ChatError> {
    let api_key = resolve_api_key(config, "Anthropic")?;
    Ok(Arc::new(AnthropicProvider::new(
        api_key,
        config.model.clone(),
        config.parameters.clone(),
        None,
    )))
}
