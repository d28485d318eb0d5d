//! OpenAI chat completions provider
//!
//! Also serves any OpenAI-compatible endpoint through a custom base URL.
//! Token counts are local estimates from the `cl100k_base` tokenizer.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::conversation::Conversation;
use crate::errors::{provider_status_error, ChatError};
use crate::llm::providers::resolve_api_key;
use crate::llm::tokens::estimate_messages;
use crate::llm::{collapse_blocks, Provider, ProviderResponse, ToolMetadata};
use crate::message::{RenderedMessage, Role, ToolCall, ToolChoice};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    stop: Vec<String>,
}

impl OpenAIProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: OPENAI_API_BASE.to_string(),
            model,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    fn build_request_body(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.format_messages(system, messages),
            "max_tokens": max_tokens,
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = temp.into();
        }
        if let Some(top_p) = self.top_p {
            body["top_p"] = top_p.into();
        }
        if !self.stop.is_empty() {
            body["stop"] = json!(self.stop);
        }

        if !tools.is_empty() {
            let formatted_tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema
                        }
                    })
                })
                .collect();
            body["tools"] = formatted_tools.into();
            body["tool_choice"] = Self::format_tool_choice(tool_choice.unwrap_or(&ToolChoice::Auto));
        }

        body
    }

    fn format_messages(&self, system: &str, messages: &[RenderedMessage]) -> Vec<Value> {
        let mut formatted = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            formatted.push(json!({"role": "system", "content": system}));
        }
        formatted.extend(messages.iter().map(|msg| {
            json!({
                "role": self.format_role(msg.role),
                "content": msg.content
            })
        }));
        formatted
    }

    fn format_role(&self, role: Role) -> &'static str {
        match role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        }
    }

    fn format_tool_choice(tool_choice: &ToolChoice) -> Value {
        match tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::None => json!("none"),
            ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        }
    }

    fn parse_response(&self, response: Value) -> Result<ProviderResponse, ChatError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| ChatError::ParsingError("No choices in response".to_string()))?;
        let message = &choice["message"];

        let texts: Vec<String> = message["content"]
            .as_str()
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let (Some(id), Some(name)) = (call["id"].as_str(), call["function"]["name"].as_str())
                else {
                    return Err(ChatError::ParsingError(format!(
                        "Tool call without id or name: {}",
                        call
                    )));
                };
                let arguments = call["function"]["arguments"].as_str().unwrap_or("");
                let input: Value = if arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(arguments).map_err(|e| {
                        ChatError::ParsingError(format!("Invalid tool call arguments JSON: {}", e))
                    })?
                };
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                });
            }
        }

        if texts.is_empty() && tool_calls.is_empty() {
            return Err(ChatError::ParsingError(
                "Response has neither content nor tool calls".to_string(),
            ));
        }

        let (text, tool_call) = collapse_blocks("OpenAI", texts, tool_calls);
        Ok(ProviderResponse {
            text,
            tool_call,
            stop_reason: choice["finish_reason"]
                .as_str()
                .unwrap_or("stop")
                .to_string(),
            input_tokens: response["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: response["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            model: response["model"]
                .as_str()
                .map(str::to_string)
                .or_else(|| Some(self.model.clone())),
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn get_message(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request_body(system, messages, tools, tool_choice, max_tokens);
        log::debug!("OpenAI API request to {}: {}", url, body);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        log::debug!("OpenAI API response ({}): {}", status, response_text);

        if !status.is_success() {
            return Err(provider_status_error("OpenAI", status, &response_text));
        }

        let response_json: Value = serde_json::from_str(&response_text)
            .map_err(|e| ChatError::ParsingError(format!("Invalid JSON response: {}", e)))?;
        self.parse_response(response_json)
    }

    async fn token_count(
        &self,
        conversation: &Conversation,
        pending: Option<&str>,
    ) -> Result<usize, ChatError> {
        Ok(estimate_messages(
            &conversation.system,
            &conversation.render(),
            pending,
        ))
    }
}

fn configure(mut provider: OpenAIProvider, config: &LlmConfig) -> OpenAIProvider {
    if config.parameters.temperature > 0.0 {
        provider = provider.with_temperature(config.parameters.temperature);
    }
    if config.parameters.top_p < 1.0 {
        provider = provider.with_top_p(config.parameters.top_p);
    }
    provider.with_stop_sequences(config.parameters.stop_sequences.clone())
}

/// Create an OpenAI provider from configuration
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>, ChatError> {
    let api_key = resolve_api_key(config, "OpenAI")?;
    let provider = OpenAIProvider::new(api_key, config.model.clone());
    Ok(Arc::new(configure(provider, config)))
}

/// Create an OpenAI-compatible provider for a custom endpoint.
///
/// Local servers often need no key, so a missing one is sent as empty.
pub fn create_custom_provider(
    config: &LlmConfig,
    base_url: &str,
) -> Result<Arc<dyn Provider>, ChatError> {
    let api_key = resolve_api_key(config, "custom OpenAI-compatible provider").unwrap_or_else(|_| {
        log::warn!("No API key configured for {}; sending requests without one", base_url);
        String::new()
    });
    let provider =
        OpenAIProvider::new(api_key, config.model.clone()).with_api_base(base_url.to_string());
    Ok(Arc::new(configure(provider, config)))
}
