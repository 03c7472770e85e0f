use crate::conversation::ChatMessage;
use crate::tool::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One LLM reply: final text, tool-call intents, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_0".to_string(),
                name: name.into(),
                arguments: arguments.into(),
            }],
        }
    }
}

/// Trait for LLM providers that support tool use.
///
/// This trait lives in tool-runtime (not in crates/llm) because it's
/// defined by the consumer (the agentic loop), not the provider.
#[async_trait]
pub trait ToolAwareLlmProvider: Send + Sync {
    /// Request the next step given the full conversation and the callable tools.
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<Completion, LlmError>;

    /// Provider name for logging/debugging (e.g., "openai")
    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Authentication failed")]
    AuthError,
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mock LLM provider for testing the agentic loop without real API calls.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued completions in order, then the fallback (or an empty
    /// completion). Records every request it receives.
    #[derive(Default)]
    pub struct MockToolAwareProvider {
        responses: Mutex<VecDeque<Completion>>,
        fallback: Option<Completion>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl MockToolAwareProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// A provider that answers every request with `completion`.
        pub fn repeating(completion: Completion) -> Self {
            Self {
                fallback: Some(completion),
                ..Self::default()
            }
        }

        /// Queue a response that will be returned on the next call.
        pub fn queue(&self, completion: Completion) {
            self.responses.lock().unwrap().push_back(completion);
        }

        pub fn queue_text(&self, text: &str) {
            self.queue(Completion::text(text));
        }

        pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolAwareLlmProvider for MockToolAwareProvider {
        async fn complete_with_tools(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<Completion, LlmError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let next = self.responses.lock().unwrap().pop_front();
            Ok(next.or_else(|| self.fallback.clone()).unwrap_or_default())
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
