//! Conversation orchestration between a user, a language model and tools.
//!
//! This crate keeps an ordered, invariant-checked conversation, drives the
//! multi-step tool-use loop against interchangeable model providers, and runs
//! tool calls on a bounded, timeout-guarded executor.
//!
//! # Architecture Overview
//!
//! - **Message model**: tagged user, assistant and tool messages with strict
//!   alternation rules ([`message`], [`conversation`])
//! - **Tools**: builder-validated tool descriptors, tool sets, built-in tools
//!   and retrieval tools ([`tools`])
//! - **Providers**: one contract over Anthropic, OpenAI-compatible and Gemini
//!   backends with retries ([`llm`])
//! - **Dispatch**: pooled or inline tool execution ([`dispatcher`])
//! - **Orchestration**: the `complete`/`spin` state machine ([`orchestrator`])
//! - **Sessions**: channel message shapes, replay and persistence
//!   ([`session`], [`store`])
//! - **Configuration**: YAML configuration with environment resolution ([`config`])

pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod errors;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod tools;

pub use config::*;
pub use conversation::{Conversation, ConversationState};
pub use dispatcher::{InlineExecutor, PooledExecutor, ToolDispatcher, ToolExecutor};
pub use errors::ChatError;
pub use llm::{create_provider, Provider, ProviderResponse, ToolMetadata};
pub use message::{
    AssistantMessage, Audience, Message, Role, ToolCall, ToolChoice, ToolMessage, UserMessage,
};
pub use orchestrator::{Deliver, Orchestrator, SpinOutcome, SpinStop, Transition};
pub use session::{ChatSession, ClientAction, EventSink, ServerEvent, SessionSettings, ToolFactory};
pub use store::{ConversationStore, InMemoryStore, JsonFileStore};
pub use tools::{Tool, ToolContext, ToolSet};

#[cfg(test)]
pub mod test_utils;
