use crate::tool::ToolDefinition;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// State of one agent loop run: the message history, the tools offered to
/// the LLM, and the round counter.
///
/// Owned by a single run and discarded when it terminates. The counter
/// starts at 1 and the run is exhausted once it reaches `max_iterations`.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    tools: Vec<ToolDefinition>,
    iteration: usize,
    max_iterations: usize,
}

impl Conversation {
    pub fn new(
        system_prompt: &str,
        question: &str,
        tools: Vec<ToolDefinition>,
        max_iterations: usize,
    ) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(question)],
            tools,
            iteration: 1,
            max_iterations,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn add_system_message(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::system(text));
    }

    pub fn add_assistant_message(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(text));
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn is_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Move to the next round.
    pub fn advance(&mut self) {
        self.iteration += 1;
    }
}
