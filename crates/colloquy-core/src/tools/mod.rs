//! Tool abstraction: validated, audience-tagged callables the assistant can invoke
//!
//! A [`Tool`] wraps a [`ToolFunction`] (the callable plus its declared
//! signature) together with the metadata a provider needs to offer it to a
//! model. Tools are only constructed through [`ToolBuilder`], which checks the
//! declared signature against the parameter documentation before anything is
//! registered, so a descriptor that exists is always well formed.
//!
//! Messages never hold tools directly. They hold [`ToolRef`]s, which persist
//! only `{name, description, input_schema}` and are re-attached to live
//! executables by name when a conversation is loaded.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use jsonschema::JSONSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use crate::conversation::Conversation;
use crate::errors::ChatError;
use crate::llm::tokens::estimate_tokens;
use crate::llm::{Provider, ToolMetadata};
use crate::message::Audience;

pub mod calculator;
pub mod retrieval;

pub use calculator::calculator_tool;
pub use retrieval::{retrieval_tools, Retriever};

pub const DEPRECATED_TOOL_MESSAGE: &str =
    "This tool has been deprecated and is no longer available.";

/// Parameter types a tool function may declare.
///
/// `Number` and `Object` exist so that signatures can describe them, but they
/// are rejected at registration: providers disagree on how to pass them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    String,
    Integer,
    Boolean,
    Number,
    Object,
    Array(Box<DeclaredType>),
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclaredType::String => write!(f, "string"),
            DeclaredType::Integer => write!(f, "integer"),
            DeclaredType::Boolean => write!(f, "boolean"),
            DeclaredType::Number => write!(f, "number"),
            DeclaredType::Object => write!(f, "object"),
            DeclaredType::Array(inner) => write!(f, "array<{}>", inner),
        }
    }
}

/// Maps a declared parameter type to its JSON schema fragment.
///
/// Returns `None` for anything other than a primitive or an array of one.
pub fn translate_type(declared: &DeclaredType) -> Option<Value> {
    match declared {
        DeclaredType::String => Some(json!({"type": "string"})),
        DeclaredType::Integer => Some(json!({"type": "integer"})),
        DeclaredType::Boolean => Some(json!({"type": "boolean"})),
        DeclaredType::Array(inner) => match inner.as_ref() {
            DeclaredType::String | DeclaredType::Integer | DeclaredType::Boolean => {
                let items = translate_type(inner)?;
                Some(json!({"type": "array", "items": items}))
            }
            _ => None,
        },
        DeclaredType::Number | DeclaredType::Object => None,
    }
}

/// Name and ordered parameter list of a tool function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub parameters: Vec<(String, DeclaredType)>,
}

impl Signature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, declared: DeclaredType) -> Self {
        self.parameters.push((name.into(), declared));
        self
    }

    fn parameter_names(&self) -> BTreeSet<&str> {
        self.parameters.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// The conversation and provider a tool call was requested from.
///
/// Empty when a tool is called outside an orchestrated turn.
#[derive(Clone, Default)]
pub struct ToolContext {
    conversation: Option<Arc<Conversation>>,
    provider: Option<Arc<dyn Provider>>,
}

impl ToolContext {
    pub fn new(conversation: Arc<Conversation>, provider: Arc<dyn Provider>) -> Self {
        Self {
            conversation: Some(conversation),
            provider: Some(provider),
        }
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_deref()
    }

    /// Input tokens the conversation would cost with `pending` added, counted
    /// by the provider. Without a conversation only `pending` is estimated.
    pub async fn token_count(&self, pending: &str) -> Result<usize, ChatError> {
        match (&self.conversation, &self.provider) {
            (Some(conversation), Some(provider)) => {
                provider.token_count(conversation, Some(pending)).await
            }
            _ => Ok(estimate_tokens(pending)),
        }
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("messages", &self.conversation.as_ref().map(|c| c.len()))
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

/// The callable behind a tool.
#[async_trait]
pub trait ToolFunction: Send + Sync {
    fn signature(&self) -> &Signature;
    async fn invoke(
        &self,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> anyhow::Result<Value>;
}

type BoxedToolFn = Arc<
    dyn Fn(Map<String, Value>, ToolContext) -> BoxFuture<'static, anyhow::Result<Value>>
        + Send
        + Sync,
>;

/// A [`ToolFunction`] backed by an async closure.
pub struct FnTool {
    signature: Signature,
    func: BoxedToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(signature: Signature, func: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            signature,
            func: Arc::new(move |arguments: Map<String, Value>, _: ToolContext| {
                func(arguments).boxed()
            }),
        }
    }

    /// Like [`FnTool::new`], for bodies that need the calling [`ToolContext`].
    pub fn with_context<F, Fut>(signature: Signature, func: F) -> Self
    where
        F: Fn(Map<String, Value>, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            signature,
            func: Arc::new(move |arguments: Map<String, Value>, context: ToolContext| {
                func(arguments, context).boxed()
            }),
        }
    }
}

#[async_trait]
impl ToolFunction for FnTool {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(
        &self,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> anyhow::Result<Value> {
        (self.func)(arguments, context).await
    }
}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("static regex is valid"))
}

/// Validating constructor for [`Tool`].
pub struct ToolBuilder {
    function: Arc<dyn ToolFunction>,
    description: Option<String>,
    parameter_descriptions: BTreeMap<String, String>,
    required_parameters: BTreeSet<String>,
    audience: Audience,
}

impl ToolBuilder {
    pub fn new(function: impl ToolFunction + 'static) -> Self {
        Self {
            function: Arc::new(function),
            description: None,
            parameter_descriptions: BTreeMap::new(),
            required_parameters: BTreeSet::new(),
            audience: Audience::Assistant,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameter_descriptions
            .insert(name.into(), description.into());
        self
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required_parameters.insert(name.into());
        self
    }

    pub fn audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    pub fn build(self) -> Result<Tool, ChatError> {
        let signature = self.function.signature().clone();
        let name = signature.name.clone();

        let description = match self.description {
            Some(d) if !d.trim().is_empty() => d,
            _ => return Err(ChatError::tool_definition(&name, "a description is required")),
        };

        let declared = signature.parameter_names();
        let documented: BTreeSet<&str> = self
            .parameter_descriptions
            .keys()
            .map(String::as_str)
            .collect();
        if declared != documented {
            let undocumented: Vec<&str> = declared.difference(&documented).copied().collect();
            let unknown: Vec<&str> = documented.difference(&declared).copied().collect();
            return Err(ChatError::tool_definition(
                &name,
                format!(
                    "parameter descriptions do not match the declared parameters (undocumented: {:?}, not declared: {:?})",
                    undocumented, unknown
                ),
            ));
        }

        if let Some(missing) = self
            .required_parameters
            .iter()
            .find(|p| !declared.contains(p.as_str()))
        {
            return Err(ChatError::tool_definition(
                &name,
                format!("required parameter '{}' is not declared", missing),
            ));
        }

        let mut properties = Map::new();
        for (param, declared_type) in &signature.parameters {
            let mut fragment = translate_type(declared_type).ok_or_else(|| {
                ChatError::tool_definition(
                    &name,
                    format!("parameter '{}' has unsupported type {}", param, declared_type),
                )
            })?;
            if let (Some(obj), Some(text)) =
                (fragment.as_object_mut(), self.parameter_descriptions.get(param))
            {
                obj.insert("description".to_string(), Value::String(text.clone()));
            }
            properties.insert(param.clone(), fragment);
        }

        if !tool_name_pattern().is_match(&name) {
            return Err(ChatError::tool_definition(
                &name,
                "name must be 1-64 characters of letters, digits, '_' or '-'",
            ));
        }

        // Keep declaration order for `required` so schemas are stable across runs.
        let required: Vec<Value> = signature
            .parameters
            .iter()
            .filter(|(param, _)| self.required_parameters.contains(param))
            .map(|(param, _)| Value::String(param.clone()))
            .collect();

        let input_schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
        let validator = JSONSchema::compile(&input_schema)
            .map_err(|e| ChatError::tool_definition(&name, format!("invalid input schema: {}", e)))?;

        Ok(Tool {
            function: self.function,
            name,
            description,
            parameter_descriptions: self.parameter_descriptions,
            required_parameters: self.required_parameters,
            audience: self.audience,
            input_schema,
            validator: Some(validator),
        })
    }
}

/// An immutable, validated tool descriptor bound to its executable.
pub struct Tool {
    function: Arc<dyn ToolFunction>,
    name: String,
    description: String,
    parameter_descriptions: BTreeMap<String, String>,
    required_parameters: BTreeSet<String>,
    audience: Audience,
    input_schema: Value,
    validator: Option<JSONSchema>,
}

impl Tool {
    pub fn builder(function: impl ToolFunction + 'static) -> ToolBuilder {
        ToolBuilder::new(function)
    }

    /// Stand-in for a persisted tool reference whose executable no longer
    /// exists. Keeps the original metadata and always answers with an
    /// exception result.
    pub fn deprecated(metadata: &ToolMetadata) -> Tool {
        let function = FnTool::new(Signature::new(metadata.name.clone()), |_| async {
            Ok(json!({ "exception": DEPRECATED_TOOL_MESSAGE }))
        });
        Tool {
            function: Arc::new(function),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            parameter_descriptions: BTreeMap::new(),
            required_parameters: BTreeSet::new(),
            audience: Audience::Assistant,
            input_schema: metadata.input_schema.clone(),
            validator: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn audience(&self) -> Audience {
        self.audience
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn parameter_descriptions(&self) -> &BTreeMap<String, String> {
        &self.parameter_descriptions
    }

    pub fn required_parameters(&self) -> &BTreeSet<String> {
        &self.required_parameters
    }

    pub fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Checks arguments against the input schema, returning every violation.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), Vec<String>> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        match validator.validate(arguments) {
            Ok(()) => Ok(()),
            Err(errors) => Err(errors.map(|e| e.to_string()).collect()),
        }
    }

    /// Runs the tool body, reporting a failure as an error.
    pub async fn try_call(&self, arguments: Map<String, Value>) -> Result<Value, ChatError> {
        self.try_call_with(arguments, ToolContext::default()).await
    }

    pub async fn try_call_with(
        &self,
        arguments: Map<String, Value>,
        context: ToolContext,
    ) -> Result<Value, ChatError> {
        self.function
            .invoke(arguments, context)
            .await
            .map_err(|e| ChatError::ToolExecution {
                tool_name: self.name.clone(),
                message: e.to_string(),
            })
    }

    /// Runs the tool body. A failure becomes `{"exception": message}` unless
    /// `debug` is set, in which case it is returned as an error.
    pub async fn call(&self, arguments: Map<String, Value>, debug: bool) -> Result<Value, ChatError> {
        match self.try_call(arguments).await {
            Ok(value) => Ok(value),
            Err(e) if debug => Err(e),
            Err(ChatError::ToolExecution { tool_name, message }) => {
                log::warn!("Tool '{}' failed: {}", tool_name, message);
                Ok(json!({ "exception": message }))
            }
            Err(e) => Ok(json!({ "exception": e.to_string() })),
        }
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("audience", &self.audience)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// A tool as stored on a message: persisted metadata plus an optional live
/// binding that is never serialized.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolRef {
    #[serde(flatten)]
    pub metadata: ToolMetadata,
    #[serde(skip)]
    binding: Option<Arc<Tool>>,
}

impl ToolRef {
    pub fn bound(tool: Arc<Tool>) -> Self {
        Self {
            metadata: tool.metadata(),
            binding: Some(tool),
        }
    }

    pub fn unbound(metadata: ToolMetadata) -> Self {
        Self {
            metadata,
            binding: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn binding(&self) -> Option<&Arc<Tool>> {
        self.binding.as_ref()
    }

    pub fn bind(&mut self, tool: Arc<Tool>) {
        self.binding = Some(tool);
    }
}

impl fmt::Debug for ToolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRef")
            .field("name", &self.metadata.name)
            .field("bound", &self.binding.is_some())
            .finish()
    }
}

/// Name-unique collection of live tools for one session.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Tool>) -> Result<Self, ChatError> {
        let mut set = Self::new();
        for tool in tools {
            set.register(tool)?;
        }
        Ok(set)
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), ChatError> {
        if self.tools.contains_key(tool.name()) {
            return Err(ChatError::tool_definition(
                tool.name(),
                "a tool with this name is already registered",
            ));
        }
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Bound references for attaching to a new user message.
    pub fn refs(&self) -> Vec<ToolRef> {
        self.tools.values().cloned().map(ToolRef::bound).collect()
    }

    pub fn metadata(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|t| t.metadata()).collect()
    }
}
