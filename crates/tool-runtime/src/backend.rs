//! The agent loop's view of the tool service.
//!
//! The loop only needs discovery and call-in/result-out. The in-process
//! [`ToolService`] implements this directly; the MCP client implements it over
//! the network.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::service::ToolService;
use crate::tool::ToolDefinition;

#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tools available for the LLM to call.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolCallError>;

    /// Invoke a tool by name. Dropping the returned future abandons the call
    /// and must not leave the underlying process running.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolCallError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolCallError {
    /// The tool ran (or was rejected) and reported an error.
    #[error("{0}")]
    Failed(String),
    #[error("tool call timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
impl ToolBackend for ToolService {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolCallError> {
        Ok(ToolService::list_tools(self))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolCallError> {
        // Dropping this future drops the child process handle, which kills it.
        self.call(name, arguments, &CancellationToken::new())
            .await
            .map_err(|e| ToolCallError::Failed(e.to_string()))
    }
}
