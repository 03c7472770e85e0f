//! External command tool.
//!
//! A single capability record `{name, binary, description}` covers every
//! command-line program the agent may drive; `kubectl` and `k8sgpt` are just
//! two instances of it.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::executor::CommandExecutor;
use crate::tool::{CommandArguments, Tool, ToolContext, ToolDefinition, ToolError};

/// Runs one external binary with the caller's argument string.
#[derive(Debug, Clone)]
pub struct ExternalCommandTool {
    name: String,
    binary: String,
    description: String,
    executor: CommandExecutor,
}

impl ExternalCommandTool {
    pub fn new(
        name: impl Into<String>,
        binary: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            description: description.into(),
            executor: CommandExecutor::new(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }
}

#[async_trait]
impl Tool for ExternalCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "arguments": {
                        "type": "string",
                        "description": format!("The arguments to pass to the {} command", self.binary)
                    }
                },
                "required": ["arguments"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<String, ToolError> {
        let args = CommandArguments::from_value(&self.name, &input)?;
        let tokens = args.tokens();
        debug!(tool = %self.name, tokens = tokens.len(), "dispatching to executor");

        let output = self
            .executor
            .execute(&self.binary, &tokens, context.timeout, &context.cancellation)
            .await?;
        Ok(output)
    }
}

/// Cluster inspector.
pub fn kubectl() -> ExternalCommandTool {
    ExternalCommandTool::new(
        "kubectl",
        "kubectl",
        "Use 'kubectl' command to check if there are any issues. Use 'kubectl logs' command to see \
         if there are any issues. Do not use kubectl edit command, instead of that use kubectl \
         patch command to make changes as and when required.",
    )
}

/// Diagnostic analyzer.
pub fn k8sgpt() -> ExternalCommandTool {
    ExternalCommandTool::new(
        "k8sgpt",
        "k8sgpt",
        "Execute 'k8sgpt' command to interact with a Kubernetes cluster. Use 'k8sgpt analyze' \
         command to check if there are any problems with the cluster or pods running.",
    )
}
