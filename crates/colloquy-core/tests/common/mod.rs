use async_trait::async_trait;
use colloquy_core::llm::tokens::estimate_messages;
use colloquy_core::message::RenderedMessage;
use colloquy_core::tools::{DeclaredType, FnTool, Signature};
use colloquy_core::{
    ChatError, Conversation, Provider, ProviderResponse, Tool, ToolCall, ToolChoice,
    ToolMetadata, ToolSet,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays queued replies and records the tool names it was offered.
#[derive(Clone, Default)]
pub struct MockProvider {
    replies: Arc<Mutex<Vec<ProviderResponse>>>,
    offered: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(self, text: &str) -> Self {
        self.replies.lock().unwrap().push(ProviderResponse {
            text: Some(text.to_string()),
            stop_reason: "end_turn".to_string(),
            output_tokens: 4,
            ..Default::default()
        });
        self
    }

    pub fn tool_call(self, name: &str, input: Value) -> Self {
        let id = format!("call_{}", self.replies.lock().unwrap().len());
        self.replies.lock().unwrap().push(ProviderResponse {
            tool_call: Some(ToolCall {
                id,
                name: name.to_string(),
                input,
            }),
            stop_reason: "tool_use".to_string(),
            output_tokens: 6,
            ..Default::default()
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.offered.lock().unwrap().len()
    }

    pub fn offered(&self) -> Vec<Vec<String>> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_message(
        &self,
        _system: &str,
        _messages: &[RenderedMessage],
        tools: &[ToolMetadata],
        _tool_choice: Option<&ToolChoice>,
        _max_tokens: u32,
    ) -> Result<ProviderResponse, ChatError> {
        self.offered
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(ChatError::InternalError("mock provider exhausted".to_string()));
        }
        Ok(replies.remove(0))
    }

    async fn token_count(
        &self,
        conversation: &Conversation,
        pending: Option<&str>,
    ) -> Result<usize, ChatError> {
        Ok(estimate_messages(&conversation.system, &conversation.render(), pending))
    }
}

/// `search` answers immediately; `stall` sleeps far past any test timeout.
pub fn tools() -> ToolSet {
    let search = FnTool::new(
        Signature::new("search").param("query", DeclaredType::String),
        |args| async move {
            let query = args["query"].as_str().unwrap_or_default().to_string();
            Ok(json!([{"source_label": "facts.txt", "text": format!("{} is 42", query)}]))
        },
    );
    let stall = FnTool::new(Signature::new("stall"), |_| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!("too late"))
    });
    ToolSet::from_tools([
        Tool::builder(search)
            .description("Search the knowledge base")
            .parameter("query", "Search terms")
            .required("query")
            .build()
            .unwrap(),
        Tool::builder(stall)
            .description("Never finishes in time")
            .build()
            .unwrap(),
    ])
    .unwrap()
}
