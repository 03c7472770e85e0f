use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress events emitted by the agentic loop while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// A new round is about to query the LLM
    RoundStarted { iteration: usize },
    /// The LLM asked for a tool
    ToolCallRequested {
        iteration: usize,
        name: String,
        arguments: String,
    },
    /// The tool-call payload was not a JSON object; the call was skipped
    ArgumentsRejected { name: String, error: String },
    /// The tool returned output
    ToolSucceeded { name: String, output: String },
    /// The tool failed or timed out
    ToolFailed { name: String, error: String },
    /// Pausing after a failure before continuing
    RetryPause { delay: Duration },
    /// The LLM produced its final answer
    Answer { text: String, rounds: usize },
    /// The LLM stopped requesting tools without a final message
    Completed { rounds: usize },
    /// The round limit was reached
    Exhausted { max_iterations: usize },
}
