use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use troubleshooter_tool_runtime::{AgenticLoop, AgenticLoopError, LoopEvent};

use crate::terminal::Terminal;

/// Read-eval-print loop over the agent. One question at a time; progress
/// events are rendered while the agent runs.
pub struct Console<'a, W: Write> {
    agent: &'a AgenticLoop,
    events: UnboundedReceiver<LoopEvent>,
    terminal: Terminal<W>,
}

impl<'a, W: Write> Console<'a, W> {
    pub fn new(agent: &'a AgenticLoop, events: UnboundedReceiver<LoopEvent>, terminal: Terminal<W>) -> Self {
        Self {
            agent,
            events,
            terminal,
        }
    }

    #[cfg(test)]
    pub fn into_terminal(self) -> Terminal<W> {
        self.terminal
    }

    /// Prompt until `quit`, end of input, or `cancel`.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, mut input: R, cancel: &CancellationToken) -> Result<()> {
        let mut line = String::new();
        loop {
            self.terminal.print_prompt()?;

            line.clear();
            let read = tokio::select! {
                read = input.read_line(&mut line) => read?,
                _ = cancel.cancelled() => break,
            };
            if read == 0 {
                debug!("end of input");
                break;
            }

            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("quit") {
                self.terminal.print_info("Exiting.")?;
                break;
            }
            self.terminal.echo_question(question)?;

            match self.ask(question, cancel).await? {
                Err(AgenticLoopError::Cancelled) => break,
                Err(e) => {
                    error!(error = %e, "prompt failed");
                    self.terminal.print_error(&format!("Error running prompt: {e}"))?;
                }
                Ok(()) => {}
            }
        }
        Ok(())
    }

    /// Run one question. The outer result is a terminal write failure; the
    /// inner one is the agent's.
    async fn ask(
        &mut self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Result<(), AgenticLoopError>> {
        let agent = self.agent;
        let run = agent.run(question, cancel);
        tokio::pin!(run);

        let result = loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => self.terminal.display_event(&event)?,
                result = &mut run => break result,
            }
        };
        while let Ok(event) = self.events.try_recv() {
            self.terminal.display_event(&event)?;
        }

        Ok(match result {
            Ok(outcome) => {
                self.terminal.print_outcome(&outcome)?;
                Ok(())
            }
            Err(e) => Err(e),
        })
    }
}
