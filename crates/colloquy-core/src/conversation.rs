//! Ordered, invariant-checked message history
//!
//! A [`Conversation`] only grows by [`Conversation::append`]. Every append,
//! every construction from existing messages and every deserialization checks
//! that user-side and assistant-side messages alternate; a rejected append
//! leaves the conversation untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ChatError;
use crate::message::{Audience, Message, RenderedMessage};
use crate::tools::{Tool, ToolRef, ToolSet};

/// What the next orchestration step will do with a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// The last message is user-side; the provider must answer it.
    AwaitingProvider,
    /// The last message is an assistant tool call that has not been run.
    ToolPending,
    /// Nothing left to do until the user speaks again.
    Terminal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "ConversationRecord")]
pub struct Conversation {
    pub system: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ConversationRecord {
    system: String,
    #[serde(default)]
    messages: Vec<Message>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = ChatError;

    fn try_from(record: ConversationRecord) -> Result<Self, Self::Error> {
        Conversation::from_messages(record.system, record.messages)
    }
}

/// Binds `tool_ref` to the same-named tool in `tools`, or to the deprecated stand-in.
pub(crate) fn bind_tool_ref(tool_ref: &mut ToolRef, tools: &ToolSet) {
    match tools.get(tool_ref.name()) {
        Some(tool) => tool_ref.bind(tool),
        None => {
            log::warn!(
                "Tool '{}' is no longer available; binding deprecated stand-in",
                tool_ref.name()
            );
            tool_ref.bind(Arc::new(Tool::deprecated(&tool_ref.metadata)));
        }
    }
}

fn check_adjacent(previous: &Message, next: &Message) -> Result<(), ChatError> {
    match (previous.side(), next.side()) {
        (Some(a), Some(b)) if a == b => Err(ChatError::InvariantViolation(format!(
            "{:?} message {} cannot follow {:?} message {}: both are {:?}-side",
            next.role(),
            next.id(),
            previous.role(),
            previous.id(),
            a
        ))),
        _ => Ok(()),
    }
}

impl Conversation {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
        }
    }

    /// Builds a conversation from existing history, validating every message
    /// and every adjacent pair.
    pub fn from_messages(
        system: impl Into<String>,
        messages: Vec<Message>,
    ) -> Result<Self, ChatError> {
        for message in &messages {
            message.validate()?;
        }
        for pair in messages.windows(2) {
            check_adjacent(&pair[0], &pair[1])?;
        }
        Ok(Self {
            system: system.into(),
            messages,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn append(&mut self, message: impl Into<Message>) -> Result<(), ChatError> {
        let message = message.into();
        message.validate()?;
        if let Some(last) = self.messages.last() {
            check_adjacent(last, &message)?;
        }
        log::debug!("Appending {:?} message {}", message.role(), message.id());
        self.messages.push(message);
        Ok(())
    }

    /// Records a 1-5 rating on an existing message.
    pub fn rate(&mut self, id: Uuid, rating: u8) -> Result<(), ChatError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or_else(|| ChatError::ValidationError(format!("no message with id {}", id)))?;
        message.set_rating(rating)
    }

    /// Re-attaches live executables to every persisted tool reference.
    ///
    /// References whose name is not in `tools` get the deprecated stand-in so
    /// old history still loads and a stale call answers instead of failing.
    pub fn rebind_tools(&mut self, tools: &ToolSet) {
        for message in &mut self.messages {
            for tool_ref in message.tools_mut() {
                bind_tool_ref(tool_ref, tools);
            }
        }
    }

    /// Provider-facing history, skipping turn boundaries.
    pub fn render(&self) -> Vec<RenderedMessage> {
        self.messages.iter().filter_map(Message::render).collect()
    }

    pub fn state(&self) -> ConversationState {
        match self.messages.last() {
            None => ConversationState::Terminal,
            Some(Message::User(_)) => ConversationState::AwaitingProvider,
            Some(Message::Tool(m)) => match m.for_whom {
                Audience::Assistant => ConversationState::AwaitingProvider,
                Audience::User => ConversationState::Terminal,
            },
            Some(Message::Assistant(m)) if m.tool_call.is_some() => ConversationState::ToolPending,
            Some(Message::Assistant(_)) => ConversationState::Terminal,
        }
    }

    /// Output tokens recorded on assistant messages so far.
    pub fn recorded_usage(&self) -> u64 {
        self.messages
            .iter()
            .map(|m| match m {
                Message::Assistant(a) => a.usage as u64,
                _ => 0,
            })
            .sum()
    }
}
