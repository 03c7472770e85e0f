//! Transport-agnostic tool service.
//!
//! Validates an incoming call against the registry and dispatches it to the
//! tool with the service's fixed per-call timeout. Holds no mutable state, so
//! any number of callers may share one instance.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::ToolRegistry;
use crate::tool::{ToolContext, ToolDefinition, ToolError};

#[derive(Clone)]
pub struct ToolService {
    registry: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl ToolService {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.registry.list()
    }

    /// Invoke a registered tool.
    ///
    /// Unknown names fail before anything is spawned. The child process is
    /// killed if `cancel` fires, the call timeout elapses, or this future is
    /// dropped.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        let tool = self.registry.get(name).ok_or_else(|| {
            warn!(tool = %name, "call for unknown tool");
            ToolError::UnknownTool(name.to_string())
        })?;

        debug!(tool = %name, "invoking tool");
        let context = ToolContext {
            timeout: self.call_timeout,
            cancellation: cancel.child_token(),
        };
        tool.execute(arguments, &context).await
    }
}
