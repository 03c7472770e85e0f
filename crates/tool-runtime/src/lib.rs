pub mod backend;
pub mod conversation;
pub mod events;
pub mod executor;
pub mod prompts;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod tool;
pub mod tools;

pub use backend::{ToolBackend, ToolCallError};
pub use conversation::{ChatMessage, Conversation, Role};
pub use events::LoopEvent;
pub use executor::{CommandExecutor, ExecError};
pub use provider::{Completion, LlmError, ToolAwareLlmProvider};
pub use registry::{RegistryError, ToolRegistry};
pub use runtime::{AgenticLoop, AgenticLoopError, LoopOutcome};
pub use service::ToolService;
pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolError};
pub use tools::{k8sgpt, kubectl, ExternalCommandTool};
