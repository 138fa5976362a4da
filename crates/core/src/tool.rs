//! Tool trait and the registry that dispatches model-issued tool calls.
//!
//! Tools give the agent the ability to act in the world: read files, run
//! commands, look things up. The registry is built once at agent construction
//! and is read-only afterwards, so it can be shared behind an `Arc` without
//! locking.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::Message;

/// Parsed tool arguments: a JSON object keyed by parameter name.
pub type ToolArguments = serde_json::Map<String, serde_json::Value>;

/// Structured payload a handler returns on success.
pub type ToolOutput = serde_json::Map<String, serde_json::Value>;

/// A request to execute a tool, as decoded from the model's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Parsed arguments
    #[serde(default)]
    pub arguments: ToolArguments,
}

/// Everything the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,

    /// JSON-schema object describing the parameters (`type`, `properties`).
    pub parameters: serde_json::Value,

    /// Parameters that must be present for the call to be attempted.
    #[serde(default)]
    pub required: BTreeSet<String>,
}

impl ToolDescriptor {
    /// The parameter schema with the `required` list merged in, as sent on the wire.
    pub fn schema(&self) -> serde_json::Value {
        let mut schema = self.parameters.clone();
        if let Some(object) = schema.as_object_mut() {
            object.insert(
                "required".into(),
                serde_json::Value::Array(
                    self.required
                        .iter()
                        .map(|name| serde_json::Value::String(name.clone()))
                        .collect(),
                ),
            );
        }
        schema
    }
}

/// Outcome recorded in a tool response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ToolStatus {
    Success,
    Failed,
}

/// The result of one dispatched tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The call this response answers
    pub tool_call_id: String,
    pub status: ToolStatus,
    pub data: ToolOutput,
}

#[derive(Serialize)]
struct ResponseBody<'a> {
    status: ToolStatus,
    data: &'a ToolOutput,
}

impl ToolResponse {
    pub fn success(tool_call_id: impl Into<String>, data: ToolOutput) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: ToolStatus::Success,
            data,
        }
    }

    /// A `FAILED` response with `data.error` set to `error`.
    pub fn failed(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut data = ToolOutput::new();
        data.insert("error".into(), serde_json::Value::String(error.into()));
        Self {
            tool_call_id: tool_call_id.into(),
            status: ToolStatus::Failed,
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// JSON text of `{status, data}`, the content of the tool message.
    pub fn body(&self) -> String {
        let body = ResponseBody {
            status: self.status,
            data: &self.data,
        };
        // A map of JSON values always serializes.
        serde_json::to_string(&body).unwrap_or_default()
    }

    /// Convert into the `tool` message appended to the conversation.
    pub fn to_message(&self) -> Message {
        Message::tool_result(&self.tool_call_id, self.body())
    }
}

/// Per-call context handed to a handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,

    /// The request cycle's lifetime token. Long-running handlers should stop
    /// when it is cancelled.
    pub cancel: CancellationToken,
}

/// The core Tool trait.
///
/// Each built-in tool implements this trait and is registered in the
/// [`ToolRegistry`] before the agent starts.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "tool_get_weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema object describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Parameters the dispatcher checks for before calling `execute`.
    fn required_params(&self) -> &[&str] {
        &[]
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: ToolArguments,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
            required: self.required_params().iter().map(|p| p.to_string()).collect(),
        }
    }
}

type HandlerFn = dyn Fn(ToolArguments, ToolContext) -> BoxFuture<'static, std::result::Result<ToolOutput, ToolError>>
    + Send
    + Sync;

/// A tool backed by a closure, for ad-hoc handlers.
struct FnTool {
    descriptor: ToolDescriptor,
    handler: Box<HandlerFn>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.descriptor.parameters.clone()
    }

    async fn execute(
        &self,
        arguments: ToolArguments,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        (self.handler)(arguments, ctx.clone()).await
    }

    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Box<dyn Tool>,
}

/// A registry of available tools and the dispatcher for their calls.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let descriptor = tool.descriptor();
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { descriptor, tool });
    }

    /// Register a closure under `descriptor.name`.
    pub fn register_fn<F, Fut>(&mut self, descriptor: ToolDescriptor, handler: F)
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let handler: Box<HandlerFn> = Box::new(move |arguments, ctx| handler(arguments, ctx).boxed());
        self.register(Box::new(FnTool {
            descriptor,
            handler,
        }));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.tool.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All descriptors, ordered by name (sent to the model on every request).
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch one tool call.
    ///
    /// Returns `None` when no tool is registered under the call's name; the
    /// call is skipped and nothing is reported back to the model. Every fault
    /// a registered handler raises, panics included, comes back as a
    /// `FAILED` response.
    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> Option<ToolResponse> {
        let Some(entry) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Skipping call to unregistered tool");
            return None;
        };

        if let Some(missing) = entry
            .descriptor
            .required
            .iter()
            .find(|param| !call.arguments.contains_key(param.as_str()))
        {
            debug!(tool = %call.name, param = %missing, "Tool call missing required argument");
            return Some(ToolResponse::failed(
                &call.id,
                ToolError::MissingArgument(missing.clone()).to_string(),
            ));
        }

        let ctx = ToolContext {
            call_id: call.id.clone(),
            cancel: cancel.clone(),
        };

        let outcome = AssertUnwindSafe(entry.tool.execute(call.arguments.clone(), &ctx))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(data)) => ToolResponse::success(&call.id, data),
            Ok(Err(e)) => {
                debug!(tool = %call.name, error = %e, "Tool returned an error");
                ToolResponse::failed(&call.id, e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(tool = %call.name, reason = %reason, "Tool handler panicked");
                ToolResponse::failed(&call.id, reason)
            }
        };
        Some(response)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("tool panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("tool panicked: {s}")
    } else {
        "tool panicked".to_string()
    }
}
