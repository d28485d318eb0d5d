pub mod mock_llm_server;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::conversation::Conversation;
use crate::errors::ChatError;
use crate::llm::tokens::estimate_messages;
use crate::llm::{Provider, ProviderResponse, ToolMetadata};
use crate::message::{RenderedMessage, ToolCall, ToolChoice};

/// What a [`ScriptedProvider`] was asked.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<RenderedMessage>,
    pub tools: Vec<ToolMetadata>,
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: u32,
}

/// Provider that replays queued responses in order.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ChatError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(ProviderResponse {
            text: Some(text.to_string()),
            stop_reason: "end_turn".to_string(),
            output_tokens: 3,
            model: Some("scripted".to_string()),
            ..Default::default()
        }));
    }

    pub fn push_tool_call(&self, name: &str, input: Value) {
        let id = format!("call_{}", self.script.lock().unwrap().len());
        self.push(Ok(ProviderResponse {
            text: None,
            tool_call: Some(ToolCall {
                id,
                name: name.to_string(),
                input,
            }),
            stop_reason: "tool_use".to_string(),
            output_tokens: 5,
            model: Some("scripted".to_string()),
            ..Default::default()
        }));
    }

    pub fn push_error(&self, error: ChatError) {
        self.push(Err(error));
    }

    fn push(&self, response: Result<ProviderResponse, ChatError>) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_message(
        &self,
        system: &str,
        messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        tool_choice: Option<&ToolChoice>,
        max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            system: system.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice: tool_choice.cloned(),
            max_tokens,
        });
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ChatError::InternalError(
                "scripted provider has no responses left".to_string(),
            ))
        })
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
