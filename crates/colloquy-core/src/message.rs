//! Message types exchanged between the user, the assistant and tools
//!
//! A conversation is a sequence of [`Message`]s. The enum is closed on purpose:
//! every piece of code that needs to know which side of the exchange a message
//! belongs to matches on all three variants, so the ordering rules in
//! `conversation` cannot silently miss a new kind of message.
//!
//! On the wire every message is a flat JSON object whose `role` field selects
//! the variant. Tool references serialize as `{name, description, input_schema}`
//! and never carry their executable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ChatError;
use crate::tools::ToolRef;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Who a tool result is meant for.
///
/// Results for the assistant are fed back to the provider and keep the loop
/// going. Results for the user end the turn and are never shown to the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    User,
    Assistant,
}

/// Which side of the exchange a message counts as for ordering purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    User,
    Assistant,
}

/// How the provider may use the tools attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    Auto,
    /// The model must call one of the tools.
    Any,
    /// The model must not call a tool.
    None,
    /// The model must call the named tool.
    Tool(String),
}

/// A single tool invocation requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The minimal payload a provider needs for one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedMessage {
    pub role: Role,
    pub content: String,
}

fn check_rating(rating: Option<u8>) -> Result<(), ChatError> {
    match rating {
        Some(r) if !(1..=5).contains(&r) => Err(ChatError::ValidationError(format!(
            "rating must be between 1 and 5, got {}",
            r
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
}

impl UserMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            tools: Vec::new(),
            tool_choice: None,
            rating: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolRef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Wire form of [`AssistantMessage`]: the tool call is spread over three
/// optional fields that must be present or absent together.
#[derive(Serialize, Deserialize)]
struct AssistantMessageRecord {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default)]
    stop_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_input: Option<Value>,
    #[serde(default)]
    usage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AssistantMessageRecord", into = "AssistantMessageRecord")]
pub struct AssistantMessage {
    id: Uuid,
    pub content: String,
    pub tools: Vec<ToolRef>,
    pub tool_choice: Option<ToolChoice>,
    pub rating: Option<u8>,
    pub model: Option<String>,
    pub stop_reason: String,
    pub tool_call: Option<ToolCall>,
    /// Output tokens spent producing this message.
    pub usage: u32,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>, stop_reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            tools: Vec::new(),
            tool_choice: None,
            rating: None,
            model: None,
            stop_reason: stop_reason.into(),
            tool_call: None,
            usage: 0,
        }
    }

    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_call = Some(tool_call);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolRef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl TryFrom<AssistantMessageRecord> for AssistantMessage {
    type Error = ChatError;

    fn try_from(record: AssistantMessageRecord) -> Result<Self, Self::Error> {
        let tool_call = match (record.tool_call_id, record.tool_call_name, record.tool_call_input) {
            (Some(id), Some(name), Some(input)) => Some(ToolCall { id, name, input }),
            (None, None, None) => None,
            _ => {
                return Err(ChatError::ValidationError(format!(
                    "assistant message {} has a partial tool call; id, name and input must be present together",
                    record.id
                )))
            }
        };

        Ok(Self {
            id: record.id,
            content: record.content,
            tools: record.tools,
            tool_choice: record.tool_choice,
            rating: record.rating,
            model: record.model,
            stop_reason: record.stop_reason,
            tool_call,
            usage: record.usage,
        })
    }
}

impl From<AssistantMessage> for AssistantMessageRecord {
    fn from(message: AssistantMessage) -> Self {
        let (tool_call_id, tool_call_name, tool_call_input) = match message.tool_call {
            Some(call) => (Some(call.id), Some(call.name), Some(call.input)),
            None => (None, None, None),
        };
        Self {
            id: message.id,
            content: message.content,
            tools: message.tools,
            tool_choice: message.tool_choice,
            rating: message.rating,
            model: message.model,
            stop_reason: message.stop_reason,
            tool_call_id,
            tool_call_name,
            tool_call_input,
            usage: message.usage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMessage {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    /// Text rendering of `result` that the provider reads.
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
    pub for_whom: Audience,
    #[serde(default)]
    pub result: Value,
}

impl ToolMessage {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
        for_whom: Audience,
        result: Value,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            tools: Vec::new(),
            tool_choice: None,
            rating: None,
            tool_name: tool_name.into(),
            arguments,
            for_whom,
            result,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

impl Message {
    pub fn id(&self) -> Uuid {
        match self {
            Message::User(m) => m.id,
            Message::Assistant(m) => m.id,
            Message::Tool(m) => m.id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::Tool(_) => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::User(m) => &m.content,
            Message::Assistant(m) => &m.content,
            Message::Tool(m) => &m.content,
        }
    }

    pub fn tools(&self) -> &[ToolRef] {
        match self {
            Message::User(m) => &m.tools,
            Message::Assistant(m) => &m.tools,
            Message::Tool(m) => &m.tools,
        }
    }

    pub(crate) fn tools_mut(&mut self) -> &mut Vec<ToolRef> {
        match self {
            Message::User(m) => &mut m.tools,
            Message::Assistant(m) => &mut m.tools,
            Message::Tool(m) => &mut m.tools,
        }
    }

    pub fn tool_choice(&self) -> Option<&ToolChoice> {
        match self {
            Message::User(m) => m.tool_choice.as_ref(),
            Message::Assistant(m) => m.tool_choice.as_ref(),
            Message::Tool(m) => m.tool_choice.as_ref(),
        }
    }

    pub fn rating(&self) -> Option<u8> {
        match self {
            Message::User(m) => m.rating,
            Message::Assistant(m) => m.rating,
            Message::Tool(m) => m.rating,
        }
    }

    pub(crate) fn set_rating(&mut self, rating: u8) -> Result<(), ChatError> {
        check_rating(Some(rating))?;
        let slot = match self {
            Message::User(m) => &mut m.rating,
            Message::Assistant(m) => &mut m.rating,
            Message::Tool(m) => &mut m.rating,
        };
        *slot = Some(rating);
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        check_rating(self.rating())
    }

    /// The side this message occupies in the alternation, or `None` for a
    /// user-facing tool result, which is a turn boundary rather than a side.
    pub fn side(&self) -> Option<Side> {
        match self {
            Message::User(_) => Some(Side::User),
            Message::Assistant(_) => Some(Side::Assistant),
            Message::Tool(m) => match m.for_whom {
                Audience::Assistant => Some(Side::User),
                Audience::User => None,
            },
        }
    }

    pub fn is_turn_boundary(&self) -> bool {
        self.side().is_none()
    }

    /// Renders the message for a provider. Turn boundaries render to nothing.
    ///
    /// Tool results are reported with the user's role, with the tool name,
    /// arguments and result folded into the text.
    pub fn render(&self) -> Option<RenderedMessage> {
        match self {
            Message::User(m) => Some(RenderedMessage {
                role: Role::User,
                content: m.content.clone(),
            }),
            Message::Assistant(m) => {
                let content = match (&m.tool_call, m.content.trim().is_empty()) {
                    (Some(call), true) => format!("(calling tool `{}`)", call.name),
                    (None, true) => "(no response)".to_string(),
                    _ => m.content.clone(),
                };
                Some(RenderedMessage {
                    role: Role::Assistant,
                    content,
                })
            }
            Message::Tool(m) if m.for_whom == Audience::User => None,
            Message::Tool(m) => {
                let arguments = m
                    .arguments
                    .as_ref()
                    .map(|args| Value::Object(args.clone()).to_string())
                    .unwrap_or_else(|| "{}".to_string());
                let result = if m.content.trim().is_empty() {
                    m.result.to_string()
                } else {
                    m.content.clone()
                };
                Some(RenderedMessage {
                    role: Role::User,
                    content: format!(
                        "[Result of tool `{}` called with arguments {}]\n{}",
                        m.tool_name, arguments, result
                    ),
                })
            }
        }
    }
}

impl From<UserMessage> for Message {
    fn from(message: UserMessage) -> Self {
        Message::User(message)
    }
}

impl From<AssistantMessage> for Message {
    fn from(message: AssistantMessage) -> Self {
        Message::Assistant(message)
    }
}

impl From<ToolMessage> for Message {
    fn from(message: ToolMessage) -> Self {
        Message::Tool(message)
    }
}
