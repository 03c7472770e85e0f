use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::executor::ExecError;

/// Describes a tool's interface for LLM consumption.
/// Maps to MCP's tool listing and OpenAI's function format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "kubectl", "k8sgpt")
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// A tool-call intent emitted by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned ID for this invocation
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it
    pub arguments: String,
}

/// Per-call execution context handed to a tool by the tool service.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Wall-clock budget for the underlying command
    pub timeout: Duration,
    /// Fires when the caller gives up on the call
    pub cancellation: CancellationToken,
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input, returning its text output.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<String, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    Execution(#[from] ExecError),
}

/// Typed payload accepted by every external-command tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArguments {
    /// Raw command-line argument string, e.g. `"get pods -n kube-system"`
    pub arguments: String,
}

impl CommandArguments {
    /// Decode a call payload. It must be a JSON object carrying a string
    /// field `arguments`; extra fields are ignored.
    pub fn from_value(tool: &str, input: &Value) -> Result<Self, ToolError> {
        let invalid = || {
            ToolError::InvalidArguments(format!(
                "missing or invalid 'arguments' string for {tool}"
            ))
        };
        let map = input.as_object().ok_or_else(invalid)?;
        let arguments = map
            .get("arguments")
            .and_then(Value::as_str)
            .ok_or_else(invalid)?;
        Ok(Self {
            arguments: arguments.to_string(),
        })
    }

    pub fn tokens(&self) -> Vec<String> {
        tokenize(&self.arguments)
    }
}

/// Split a raw argument string on whitespace. No quoting is honoured, so an
/// empty or blank string yields no tokens.
pub fn tokenize(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(String::from).collect()
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}
