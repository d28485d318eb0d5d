//! The orchestration loop.
//!
//! [`Orchestrator::complete`] advances a conversation by exactly one
//! transition, chosen by its last message:
//!
//! | last message                          | transition                      |
//! |---------------------------------------|---------------------------------|
//! | none                                  | unchanged                       |
//! | tool result for the user              | unchanged                       |
//! | assistant message with a tool call    | dispatch, append tool result    |
//! | assistant message without a tool call | unchanged                       |
//! | user message, tool result for model   | call provider, append assistant |
//!
//! [`Orchestrator::spin`] repeats `complete` until nothing changes, handing
//! the conversation to a [`Deliver`] after every change. Once the tool-call
//! ceiling is reached the provider is asked once more with no tools offered,
//! so a capped turn still ends on an assistant answer.

use async_trait::async_trait;
use std::sync::Arc;

use crate::conversation::{Conversation, ConversationState};
use crate::dispatcher::ToolDispatcher;
use crate::errors::ChatError;
use crate::llm::{Provider, ToolMetadata};
use crate::message::{AssistantMessage, Audience, Message};
use crate::tools::ToolContext;

/// Assistant text used when a capped turn produced nothing but a tool call.
pub const TOOL_LIMIT_MESSAGE: &str =
    "I reached the limit on tool calls for this turn before finding an answer.";

/// Result of a single [`Orchestrator::complete`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    ProviderReplied,
    ToolDispatched,
}

impl Transition {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinStop {
    /// A step left the conversation unchanged.
    Terminal,
    /// The tool-call ceiling cut the turn short.
    ToolCallLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinOutcome {
    pub steps: usize,
    pub tool_calls: usize,
    pub stop: SpinStop,
}

/// Receives the conversation after every step of a spin.
#[async_trait]
pub trait Deliver: Send {
    async fn deliver(&mut self, conversation: &Conversation) -> Result<(), ChatError>;
}

#[async_trait]
impl<F> Deliver for F
where
    F: FnMut(&Conversation) + Send,
{
    async fn deliver(&mut self, conversation: &Conversation) -> Result<(), ChatError> {
        self(conversation);
        Ok(())
    }
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    dispatcher: ToolDispatcher,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, dispatcher: ToolDispatcher) -> Self {
        Self {
            provider,
            dispatcher,
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Performs one state transition on `conversation`.
    ///
    /// On error the conversation is left as it was.
    pub async fn complete(
        &self,
        conversation: &mut Conversation,
        max_tokens: u32,
    ) -> Result<Transition, ChatError> {
        self.step(conversation, max_tokens, true).await
    }

    async fn step(
        &self,
        conversation: &mut Conversation,
        max_tokens: u32,
        offer_tools: bool,
    ) -> Result<Transition, ChatError> {
        let next = match conversation.last() {
            None => return Ok(Transition::Unchanged),
            Some(Message::Tool(m)) if m.for_whom == Audience::User => {
                return Ok(Transition::Unchanged)
            }
            Some(Message::Assistant(m)) if m.tool_call.is_none() => {
                return Ok(Transition::Unchanged)
            }
            Some(Message::Assistant(m)) => {
                let context =
                    ToolContext::new(Arc::new(conversation.clone()), self.provider.clone());
                let tool_message = self.dispatcher.dispatch_with(m, context).await?;
                log::info!(
                    "Dispatched tool '{}' (result for {:?})",
                    tool_message.tool_name,
                    tool_message.for_whom
                );
                Message::Tool(tool_message)
            }
            Some(last) => Message::Assistant(
                self.ask_provider(conversation, last, max_tokens, offer_tools)
                    .await?,
            ),
        };

        let transition = match next {
            Message::Tool(_) => Transition::ToolDispatched,
            _ => Transition::ProviderReplied,
        };
        conversation.append(next)?;
        Ok(transition)
    }

    async fn ask_provider(
        &self,
        conversation: &Conversation,
        last: &Message,
        max_tokens: u32,
        offer_tools: bool,
    ) -> Result<AssistantMessage, ChatError> {
        let tools: Vec<ToolMetadata> = if offer_tools {
            last.tools().iter().map(|t| t.metadata.clone()).collect()
        } else {
            Vec::new()
        };
        let tool_choice = if tools.is_empty() {
            None
        } else {
            last.tool_choice()
        };
        let rendered = conversation.render();

        log::info!(
            "Requesting {} reply for {} messages with {} tools",
            self.provider.name(),
            rendered.len(),
            tools.len()
        );
        let response = self
            .provider
            .get_message(&conversation.system, &rendered, &tools, tool_choice, max_tokens)
            .await?;
        log::debug!("Provider response: {:?}", response);

        let mut message = AssistantMessage::new(
            response.text.unwrap_or_default(),
            response.stop_reason,
        );
        message.tool_call = response.tool_call;
        message.tools = last.tools().to_vec();
        message.tool_choice = last.tool_choice().cloned();
        message.model = response.model;
        message.usage = response.output_tokens;

        if !offer_tools {
            if let Some(call) = message.tool_call.take() {
                log::warn!(
                    "Dropping call to '{}' requested after the tool call limit",
                    call.name
                );
                if message.content.trim().is_empty() {
                    message.content = TOOL_LIMIT_MESSAGE.to_string();
                }
            }
        }

        match &message.tool_call {
            Some(call) => log::info!("Assistant requested tool '{}'", call.name),
            None => log::info!("Assistant replied ({} output tokens)", message.usage),
        }
        Ok(message)
    }

    /// Runs `complete` until the conversation stops changing.
    ///
    /// `deliver` sees the conversation after every step that changed it; the
    /// final unchanged step is not delivered. After `max_tool_calls` dispatches
    /// the provider is called without tools and any tool call it still makes
    /// is dropped, leaving the turn terminal.
    pub async fn spin<D>(
        &self,
        conversation: &mut Conversation,
        max_tool_calls: usize,
        deliver: &mut D,
        max_tokens: u32,
    ) -> Result<SpinOutcome, ChatError>
    where
        D: Deliver + ?Sized,
    {
        let mut steps = 0;
        let mut tool_calls = 0;
        let mut capped = false;

        loop {
            let limited = tool_calls >= max_tool_calls;
            if limited {
                match conversation.state() {
                    // Only reachable when resuming a stored call past the limit.
                    ConversationState::ToolPending => {
                        log::warn!("Tool call limit of {} reached", max_tool_calls);
                        return Ok(SpinOutcome {
                            steps,
                            tool_calls,
                            stop: SpinStop::ToolCallLimit,
                        });
                    }
                    ConversationState::AwaitingProvider
                        if conversation.last().is_some_and(|m| !m.tools().is_empty()) =>
                    {
                        if !capped {
                            log::warn!(
                                "Tool call limit of {} reached; asking for a final answer",
                                max_tool_calls
                            );
                        }
                        capped = true;
                    }
                    _ => {}
                }
            }

            let transition = self.step(conversation, max_tokens, !limited).await?;
            if !transition.is_changed() {
                log::info!("Spin finished after {} steps", steps);
                return Ok(SpinOutcome {
                    steps,
                    tool_calls,
                    stop: if capped {
                        SpinStop::ToolCallLimit
                    } else {
                        SpinStop::Terminal
                    },
                });
            }

            steps += 1;
            deliver.deliver(conversation).await?;
            if transition == Transition::ToolDispatched {
                tool_calls += 1;
            }
        }
    }
}
