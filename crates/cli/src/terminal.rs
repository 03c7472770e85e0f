use anyhow::Result;
use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::Write;
use tracing::debug;

use troubleshooter_mcp::ImplementationInfo;
use troubleshooter_tool_runtime::{LoopEvent, LoopOutcome, ToolDefinition};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const PROMPT: Color = Color::Green;
    const ANSWER: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Console output. Colors are skipped when writing to something that is not
/// a terminal (or when disabled).
pub struct Terminal<W: Write> {
    out: W,
    colored: bool,
}

impl<W: Write> Terminal<W> {
    pub fn new(out: W, colored: bool) -> Self {
        Self { out, colored }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn styled(&mut self, color: Color, text: &str) -> Result<()> {
        if self.colored {
            queue!(self.out, SetForegroundColor(color), Print(text), ResetColor)?;
        } else {
            queue!(self.out, Print(text))?;
        }
        Ok(())
    }

    fn line(&mut self, color: Color, text: &str) -> Result<()> {
        self.styled(color, text)?;
        queue!(self.out, Print("\n"))?;
        self.out.flush()?;
        Ok(())
    }

    pub fn print_info(&mut self, text: &str) -> Result<()> {
        self.line(Colors::DIM, text)
    }

    pub fn print_error(&mut self, text: &str) -> Result<()> {
        self.line(Colors::ERROR, text)
    }

    pub fn print_connected(&mut self, server: &ImplementationInfo) -> Result<()> {
        self.line(
            Colors::HEADER,
            &format!("Initialized with server: {} {}", server.name, server.version),
        )
    }

    pub fn print_tools(&mut self, tools: &[ToolDefinition]) -> Result<()> {
        self.line(Colors::HEADER, "Available tools:")?;
        for tool in tools {
            self.line(Colors::DIM, &format!("- {}: {}", tool.name, tool.description))?;
        }
        Ok(())
    }

    pub fn print_prompt(&mut self) -> Result<()> {
        queue!(self.out, Print("\n"))?;
        self.line(
            Colors::PROMPT,
            "Enter your question about the Kubernetes cluster (type 'quit' to exit):",
        )
    }

    pub fn echo_question(&mut self, question: &str) -> Result<()> {
        self.line(Colors::PROMPT, &format!("> {question}"))
    }

    /// Render one progress event. Terminal events are left to
    /// [`print_outcome`](Self::print_outcome).
    pub fn display_event(&mut self, event: &LoopEvent) -> Result<()> {
        match event {
            LoopEvent::RoundStarted { iteration } => {
                debug!(iteration, "checking for tool calls");
                Ok(())
            }
            LoopEvent::ToolCallRequested {
                iteration,
                name,
                arguments,
            } => {
                self.line(Colors::TOOL_CALL, &format!("Iteration {iteration} - Tool call: {name}"))?;
                self.line(Colors::DIM, &format!("Tool call arguments: {arguments}"))
            }
            LoopEvent::ArgumentsRejected { name, error } => self.line(
                Colors::ERROR,
                &format!("Could not parse arguments for {name}: {error}"),
            ),
            LoopEvent::ToolSucceeded { output, .. } => {
                self.line(Colors::TOOL_RESULT, &format!("Tool result content: {output}"))
            }
            LoopEvent::ToolFailed { error, .. } => self.line(
                Colors::ERROR,
                &format!("tool execution failed or timeout: {error}"),
            ),
            LoopEvent::RetryPause { delay } => self.line(
                Colors::DIM,
                &format!("sleeping for {} seconds, before retrying", delay.as_secs()),
            ),
            LoopEvent::Answer { .. } | LoopEvent::Completed { .. } | LoopEvent::Exhausted { .. } => {
                Ok(())
            }
        }
    }

    pub fn print_outcome(&mut self, outcome: &LoopOutcome) -> Result<()> {
        queue!(self.out, Print("\n"))?;
        match outcome {
            LoopOutcome::Answered { text, rounds } => {
                self.line(Colors::ANSWER, &format!("Got LLM response: {text}"))?;
                self.line(Colors::DIM, &format!("Task completed after {rounds} iterations"))
            }
            LoopOutcome::Completed { rounds } => self.line(
                Colors::DIM,
                &format!("No more tool calls, task completed after {rounds} iterations"),
            ),
            LoopOutcome::Exhausted { max_iterations, .. } => self.line(
                Colors::ERROR,
                &format!("Reached maximum iterations ({max_iterations}) without completing the task"),
            ),
        }
    }
}
