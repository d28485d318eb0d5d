//! Google Gemini provider
//!
//! Calls `generateContent` with `functionDeclarations`. Gemini reports usage
//! per call only, so token counts combine the output usage recorded on
//! assistant messages with a local estimate of everything else.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{LlmConfig, ModelParameters};
use crate::conversation::Conversation;
use crate::errors::{provider_status_error, ChatError};
use crate::llm::providers::resolve_api_key;
use crate::llm::tokens::estimate_messages;
use crate::llm::{collapse_blocks, Provider, ProviderResponse, ToolMetadata};
use crate::message::{RenderedMessage, Role, ToolCall, ToolChoice};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini API provider
pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
    parameters: ModelParameters,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, parameters: ModelParameters) -> Self {
        Self::with_base_url(api_key, model, parameters, GEMINI_API_BASE.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        model: String,
        parameters: ModelParameters,
        base_url: String,
    ) -> Self {
        Self {
            api_key,
            model,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            parameters,
        }
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(rename = "toolConfig", skip_serializing_if = "Option::is_none")]
    tool_config: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    Other(Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "stopSequences", skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion", default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetails {
    message: String,
}

impl GeminiProvider {
    fn text_content(role: Option<&str>, text: &str) -> GeminiContent {
        GeminiContent {
            role: role.map(str::to_string),
            parts: vec![GeminiPart::Text {
                text: text.to_string(),
            }],
        }
    }

    /// Converts rendered history to `contents`, merging consecutive turns of
    /// the same role since Gemini expects user and model turns to alternate.
    fn convert_messages(&self, messages: &[RenderedMessage]) -> Vec<GeminiContent> {
        let mut contents: Vec<GeminiContent> = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::Assistant => "model",
                Role::User | Role::Tool => "user",
            };
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => {
                    last.parts.push(GeminiPart::Text {
                        text: message.content.clone(),
                    });
                }
                _ => contents.push(Self::text_content(Some(role), &message.content)),
            }
        }
        contents
    }

    fn convert_tools(&self, tools: &[ToolMetadata]) -> Vec<GeminiTool> {
        if tools.is_empty() {
            return vec![];
        }

        let function_declarations = tools
            .iter()
            .map(|tool| GeminiFunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            })
            .collect();

        vec![GeminiTool {
            function_declarations,
        }]
    }

    fn convert_tool_choice(tool_choice: &ToolChoice) -> Value {
        let config = match tool_choice {
            ToolChoice::Auto => json!({"mode": "AUTO"}),
            ToolChoice::Any => json!({"mode": "ANY"}),
            ToolChoice::None => json!({"mode": "NONE"}),
            ToolChoice::Tool(name) => json!({"mode": "ANY", "allowedFunctionNames": [name]}),
        };
        json!({ "functionCallingConfig": config })
    }

    fn convert_response(&self, response: GeminiResponse) -> Result<ProviderResponse, ChatError> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::ParsingError("No candidates in Gemini response".to_string()))?;

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.parts {
            match part {
                GeminiPart::Text { text } => texts.push(text),
                GeminiPart::FunctionCall { function_call } => tool_calls.push(ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name: function_call.name,
                    input: if function_call.args.is_null() {
                        json!({})
                    } else {
                        function_call.args
                    },
                }),
                GeminiPart::Other(_) => {}
            }
        }

        let (text, tool_call) = collapse_blocks("Gemini", texts, tool_calls);
        let usage = response.usage_metadata;

        Ok(ProviderResponse {
            text,
            tool_call,
            stop_reason: candidate.finish_reason.unwrap_or_else(|| "STOP".to_string()),
            input_tokens: usage.as_ref().and_then(|u| u.prompt_token_count).unwrap_or(0),
            output_tokens: usage.as_ref().and_then(|u| u.candidates_token_count).unwrap_or(0),
            model: response.model_version.or_else(|| Some(self.model.clone())),
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn get_message(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError> {
        let request = GeminiRequest {
            contents: self.convert_messages(messages),
            generation_config: GeminiGenerationConfig {
                temperature: self.parameters.temperature,
                max_output_tokens: max_tokens,
                top_p: self.parameters.top_p,
                stop_sequences: self.parameters.stop_sequences.clone(),
            },
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(Self::text_content(None, system))
            },
            tools: self.convert_tools(tools),
            tool_config: if tools.is_empty() {
                None
            } else {
                tool_choice.map(Self::convert_tool_choice)
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        log::debug!("Gemini API request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<GeminiError>(&response_text)
                .map(|e| e.error.message)
                .unwrap_or(response_text);
            return Err(provider_status_error("Gemini", status, &detail));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&response_text)?;
        self.convert_response(gemini_response)
    }

    async fn token_count(
        &self,
        conversation: &Conversation,
        pending: Option<&str>,
    ) -> Result<usize, ChatError> {
        let unbilled: Vec<RenderedMessage> = conversation
            .render()
            .into_iter()
            .filter(|m| m.role != Role::Assistant)
            .collect();
        let recorded = conversation.recorded_usage() as usize;
        Ok(recorded + estimate_messages(&conversation.system, &unbilled, pending))
    }
}

/// Create a Gemini provider from configuration
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn Provider>, ChatError> {
    let api_key = resolve_api_key(config, "Gemini")?;
    Ok(Arc::new(GeminiProvider::new(
        api_key,
        config.model.clone(),
        config.parameters.clone(),
    )))
}
