//! Tool dispatch: runs the tool call on an assistant message and records the
//! outcome as a tool message.
//!
//! Execution happens on an injectable [`ToolExecutor`]. The [`PooledExecutor`]
//! bounds concurrency with a semaphore shared by every session holding the
//! same `Arc`, runs each call on its own task under a timeout, and aborts that
//! task when the timeout fires. The [`InlineExecutor`] runs calls on the
//! caller's task with the same timeout, which keeps tests deterministic.
//!
//! Every outcome becomes a `ToolMessage`: successes carry the tool's result,
//! and failures carry one of `{"exception": ...}`, `{"timeout": ...}` or
//! `{"validation_error": ...}` so the model can see what went wrong.

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::config::ToolsConfig;
use crate::errors::ChatError;
use crate::message::{AssistantMessage, Audience, ToolChoice, ToolMessage};
use crate::tools::{Tool, ToolContext};

/// How a single tool execution ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(ChatError),
    Panicked(String),
    TimedOut(Duration),
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool: Arc<Tool>,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> ExecutionOutcome;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "tool panicked".to_string()
    }
}

/// Bounded pool of tool tasks.
pub struct PooledExecutor {
    slots: Arc<Semaphore>,
    timeout: Duration,
}

impl PooledExecutor {
    pub fn new(pool_size: usize, timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(pool_size.max(1))),
            timeout,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(config.pool_size, config.timeout())
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

#[async_trait]
impl ToolExecutor for PooledExecutor {
    async fn execute(
        &self,
        tool: Arc<Tool>,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> ExecutionOutcome {
        let permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecutionOutcome::Failed(ChatError::InternalError(
                    "tool pool has been shut down".to_string(),
                ))
            }
        };

        // The permit lives in the task so an aborted call frees its slot.
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            tool.try_call_with(arguments, context).await
        });

        match timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => ExecutionOutcome::Completed(value),
            Ok(Ok(Err(e))) => ExecutionOutcome::Failed(e),
            Ok(Err(join_error)) if join_error.is_panic() => {
                ExecutionOutcome::Panicked(panic_message(join_error.into_panic()))
            }
            Ok(Err(join_error)) => ExecutionOutcome::Failed(ChatError::InternalError(format!(
                "tool task ended unexpectedly: {}",
                join_error
            ))),
            Err(_) => {
                handle.abort();
                ExecutionOutcome::TimedOut(self.timeout)
            }
        }
    }
}

/// Runs tools on the calling task.
pub struct InlineExecutor {
    timeout: Duration,
}

impl InlineExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolExecutor for InlineExecutor {
    async fn execute(
        &self,
        tool: Arc<Tool>,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> ExecutionOutcome {
        let call = AssertUnwindSafe(tool.try_call_with(arguments, context)).catch_unwind();
        match timeout(self.timeout, call).await {
            Ok(Ok(Ok(value))) => ExecutionOutcome::Completed(value),
            Ok(Ok(Err(e))) => ExecutionOutcome::Failed(e),
            Ok(Err(payload)) => ExecutionOutcome::Panicked(panic_message(payload)),
            Err(_) => ExecutionOutcome::TimedOut(self.timeout),
        }
    }
}

/// Renders a tool result as the text a provider reads.
fn summarize(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
    debug: bool,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor,
            debug: false,
        }
    }

    /// In debug mode tool failures and panics are returned as errors instead
    /// of being recorded as exception results.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Runs the tool call carried by `request` and builds the resulting tool message.
    pub async fn dispatch(&self, request: &AssistantMessage) -> Result<ToolMessage, ChatError> {
        self.dispatch_with(request, ToolContext::default()).await
    }

    /// [`ToolDispatcher::dispatch`], handing `context` to the tool body.
    pub async fn dispatch_with(
        &self,
        request: &AssistantMessage,
        context: ToolContext,
    ) -> Result<ToolMessage, ChatError> {
        let call = request.tool_call.as_ref().ok_or_else(|| {
            ChatError::InternalError(format!(
                "assistant message {} has no tool call to dispatch",
                request.id()
            ))
        })?;

        let arguments = match &call.input {
            Value::Object(map) => Some(map.clone()),
            Value::Null => Some(Map::new()),
            _ => None,
        };

        let (for_whom, result) = match arguments.as_ref() {
            None => (
                Audience::Assistant,
                json!({ "validation_error": format!(
                    "Arguments for tool '{}' must be a JSON object, got {}",
                    call.name, call.input
                )}),
            ),
            Some(args) => self.run(request, &call.name, args.clone(), context).await?,
        };

        let mut message = ToolMessage::new(
            call.name.clone(),
            arguments,
            for_whom,
            result.clone(),
            summarize(&result),
        );
        message.tools = request.tools.clone();
        if !message.tools.is_empty() {
            message.tool_choice = Some(ToolChoice::Auto);
        }
        Ok(message)
    }

    async fn run(
        &self,
        request: &AssistantMessage,
        name: &str,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> Result<(Audience, Value), ChatError> {
        let Some(tool_ref) = request.tools.iter().find(|t| t.name() == name) else {
            let available: Vec<&str> = request.tools.iter().map(|t| t.name()).collect();
            log::warn!("Model requested unknown tool '{}'", name);
            return Ok((
                Audience::Assistant,
                json!({ "validation_error": format!(
                    "Unknown tool '{}'. Available tools: [{}]",
                    name,
                    available.join(", ")
                )}),
            ));
        };

        let Some(tool) = tool_ref.binding().cloned() else {
            log::warn!("Tool '{}' has no executable bound", name);
            return Ok((
                Audience::Assistant,
                json!({ "validation_error": format!("Tool '{}' is not available in this session", name) }),
            ));
        };

        if let Err(errors) = tool.validate_arguments(&Value::Object(arguments.clone())) {
            log::warn!("Invalid arguments for tool '{}': {:?}", name, errors);
            return Ok((
                Audience::Assistant,
                json!({ "validation_error": format!(
                    "Invalid arguments for tool '{}': {}",
                    name,
                    errors.join("; ")
                )}),
            ));
        }

        let audience = tool.audience();
        let started = Instant::now();
        let outcome = self.executor.execute(tool, arguments, context).await;
        log::info!(
            "Tool '{}' finished in {}ms",
            name,
            started.elapsed().as_millis()
        );

        let result = match outcome {
            ExecutionOutcome::Completed(value) => value,
            ExecutionOutcome::Failed(e) if self.debug => return Err(e),
            ExecutionOutcome::Failed(e) => {
                log::warn!("Tool '{}' failed: {}", name, e);
                let message = match e {
                    ChatError::ToolExecution { message, .. } => message,
                    other => other.to_string(),
                };
                json!({ "exception": message })
            }
            ExecutionOutcome::Panicked(message) if self.debug => {
                return Err(ChatError::ToolExecution {
                    tool_name: name.to_string(),
                    message: format!("panicked: {}", message),
                })
            }
            ExecutionOutcome::Panicked(message) => {
                log::warn!("Tool '{}' panicked: {}", name, message);
                json!({ "exception": message })
            }
            ExecutionOutcome::TimedOut(limit) => {
                log::warn!("Tool '{}' timed out after {:?}", name, limit);
                json!({ "timeout": format!(
                    "Tool '{}' did not finish within {} seconds",
                    name,
                    limit.as_secs_f64()
                )})
            }
        };

        Ok((audience, result))
    }
}
