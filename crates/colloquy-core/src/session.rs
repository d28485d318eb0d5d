//! Chat sessions over a bidirectional channel.
//!
//! A [`ChatSession`] owns one conversation. It replays the stored state when a
//! client connects, resumes an unfinished turn, applies [`ClientAction`]s and
//! emits a [`ServerEvent`] after every change. The conversation is saved to the
//! [`ConversationStore`] before each event goes out.
//!
//! The transport itself is not part of this module; anything that can carry
//! `ServerEvent`s implements [`EventSink`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ColloquyConfig, RetrievalConfig};
use crate::conversation::{bind_tool_ref, Conversation, ConversationState};
use crate::errors::ChatError;
use crate::message::{ToolChoice, UserMessage};
use crate::orchestrator::{Deliver, Orchestrator, SpinOutcome};
use crate::store::ConversationStore;
use crate::tools::{retrieval_tools, Retriever, ToolSet};

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong while generating a response.";

/// Client to server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientAction {
    Append {
        message: UserMessage,
        /// Document collections the retrieval tools may read for this turn.
        #[serde(default)]
        collections: Vec<String>,
    },
    Rate {
        uuid: Uuid,
        rating: u8,
    },
}

/// Server to client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEvent {
    Conversation { conversation: Conversation },
    Error { error: String },
}

#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: ServerEvent) -> Result<(), ChatError>;
}

#[async_trait]
impl EventSink for tokio::sync::mpsc::Sender<ServerEvent> {
    async fn send(&mut self, event: ServerEvent) -> Result<(), ChatError> {
        tokio::sync::mpsc::Sender::send(self, event)
            .await
            .map_err(|_| ChatError::InternalError("client channel closed".to_string()))
    }
}

#[async_trait]
impl EventSink for Vec<ServerEvent> {
    async fn send(&mut self, event: ServerEvent) -> Result<(), ChatError> {
        self.push(event);
        Ok(())
    }
}

/// Builds the live tools for a turn from the collections the client selected.
pub trait ToolFactory: Send + Sync {
    fn tools_for(&self, collections: &[String]) -> Result<ToolSet, ChatError>;
}

impl<F> ToolFactory for F
where
    F: Fn(&[String]) -> Result<ToolSet, ChatError> + Send + Sync,
{
    fn tools_for(&self, collections: &[String]) -> Result<ToolSet, ChatError> {
        self(collections)
    }
}

impl ToolFactory for ToolSet {
    fn tools_for(&self, _collections: &[String]) -> Result<ToolSet, ChatError> {
        Ok(self.clone())
    }
}

/// Fixed tools plus the retrieval tools scoped to the selected collections.
pub struct RetrievalToolFactory {
    retriever: Arc<dyn Retriever>,
    settings: RetrievalConfig,
    base: ToolSet,
}

impl RetrievalToolFactory {
    pub fn new(retriever: Arc<dyn Retriever>, settings: RetrievalConfig, base: ToolSet) -> Self {
        Self {
            retriever,
            settings,
            base,
        }
    }
}

impl ToolFactory for RetrievalToolFactory {
    fn tools_for(&self, collections: &[String]) -> Result<ToolSet, ChatError> {
        let mut tools = self.base.clone();
        for tool in retrieval_tools(self.retriever.clone(), collections.to_vec(), &self.settings)? {
            tools.register(tool)?;
        }
        Ok(tools)
    }
}

/// Per-session orchestration limits.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub max_tool_calls: usize,
    pub max_tokens: u32,
    pub debug: bool,
}

impl From<&ColloquyConfig> for SessionSettings {
    fn from(config: &ColloquyConfig) -> Self {
        Self {
            system_prompt: config.orchestration.system_prompt.clone(),
            max_tool_calls: config.orchestration.max_tool_calls,
            max_tokens: config.max_tokens(),
            debug: config.orchestration.debug,
        }
    }
}

/// Saves and forwards the conversation after every spin step.
struct Publisher<'a> {
    id: &'a str,
    store: &'a dyn ConversationStore,
    sink: &'a mut dyn EventSink,
}

impl<'a> Publisher<'a> {
    async fn publish(&mut self, conversation: &Conversation) -> Result<(), ChatError> {
        self.store.save(self.id, conversation).await?;
        self.sink
            .send(ServerEvent::Conversation {
                conversation: conversation.clone(),
            })
            .await
    }
}

#[async_trait]
impl<'a> Deliver for Publisher<'a> {
    async fn deliver(&mut self, conversation: &Conversation) -> Result<(), ChatError> {
        self.publish(conversation).await
    }
}

pub struct ChatSession {
    id: String,
    conversation: Conversation,
    store: Arc<dyn ConversationStore>,
    orchestrator: Arc<Orchestrator>,
    tools: Arc<dyn ToolFactory>,
    settings: SessionSettings,
}

impl ChatSession {
    /// Opens session `id`: loads or creates its conversation, replays it to
    /// `sink` and finishes any turn that was interrupted.
    pub async fn connect(
        id: impl Into<String>,
        store: Arc<dyn ConversationStore>,
        orchestrator: Arc<Orchestrator>,
        tools: Arc<dyn ToolFactory>,
        settings: SessionSettings,
        sink: &mut dyn EventSink,
    ) -> Result<Self, ChatError> {
        let id = id.into();
        let conversation = match store.load(&id).await? {
            Some(mut conversation) => {
                log::info!(
                    "Replaying conversation '{}' ({} messages)",
                    id,
                    conversation.len()
                );
                conversation.rebind_tools(&tools.tools_for(&[])?);
                conversation
            }
            None => {
                log::info!("Starting conversation '{}'", id);
                Conversation::new(settings.system_prompt.clone())
            }
        };

        let mut session = Self {
            id,
            conversation,
            store,
            orchestrator,
            tools,
            settings,
        };

        session.publisher(sink).publish(&session.conversation).await?;
        if session.conversation.state() != ConversationState::Terminal {
            log::info!("Resuming unfinished turn in '{}'", session.id);
            session.run_turn(sink).await?;
        }
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn publisher<'a>(&'a self, sink: &'a mut dyn EventSink) -> Publisher<'a> {
        Publisher {
            id: &self.id,
            store: self.store.as_ref(),
            sink,
        }
    }

    /// Applies one client action. Turn failures are reported to the client
    /// as error events; store and channel failures are returned.
    pub async fn handle(
        &mut self,
        action: ClientAction,
        sink: &mut dyn EventSink,
    ) -> Result<(), ChatError> {
        match action {
            ClientAction::Append {
                message,
                collections,
            } => self.append(message, &collections, sink).await,
            ClientAction::Rate { uuid, rating } => {
                if let Err(e) = self.conversation.rate(uuid, rating) {
                    return self.report(e, sink).await;
                }
                log::info!("Rated message {} with {}", uuid, rating);
                self.publisher(sink).publish(&self.conversation).await
            }
        }
    }

    async fn append(
        &mut self,
        mut message: UserMessage,
        collections: &[String],
        sink: &mut dyn EventSink,
    ) -> Result<(), ChatError> {
        let tools = match self.tools.tools_for(collections) {
            Ok(tools) => tools,
            Err(e) => return self.report(e, sink).await,
        };

        if message.tools.is_empty() {
            message.tools = tools.refs();
            if message.tool_choice.is_none() && !message.tools.is_empty() {
                message.tool_choice = Some(ToolChoice::Auto);
            }
        } else {
            for tool_ref in &mut message.tools {
                bind_tool_ref(tool_ref, &tools);
            }
        }

        if let Err(e) = self.conversation.append(message) {
            return self.report(e, sink).await;
        }
        self.publisher(sink).publish(&self.conversation).await?;
        self.run_turn(sink).await
    }

    async fn run_turn(&mut self, sink: &mut dyn EventSink) -> Result<(), ChatError> {
        let mut publisher = Publisher {
            id: &self.id,
            store: self.store.as_ref(),
            sink,
        };
        let result = self
            .orchestrator
            .spin(
                &mut self.conversation,
                self.settings.max_tool_calls,
                &mut publisher,
                self.settings.max_tokens,
            )
            .await;

        match result {
            Ok(SpinOutcome {
                steps, tool_calls, ..
            }) => {
                log::info!(
                    "Turn in '{}' finished: {} steps, {} tool calls",
                    self.id,
                    steps,
                    tool_calls
                );
                Ok(())
            }
            Err(e @ (ChatError::StoreError(_) | ChatError::IoError(_))) => Err(e),
            Err(e) => self.report(e, sink).await,
        }
    }

    async fn report(&self, error: ChatError, sink: &mut dyn EventSink) -> Result<(), ChatError> {
        log::error!("Turn failed in '{}': {}", self.id, error);
        let text = if self.settings.debug {
            error.to_string()
        } else {
            GENERIC_ERROR_MESSAGE.to_string()
        };
        sink.send(ServerEvent::Error { error: text }).await
    }

    /// Removes the stored conversation.
    pub async fn delete(self) -> Result<(), ChatError> {
        log::info!("Deleting conversation '{}'", self.id);
        self.store.delete(&self.id).await
    }
}
