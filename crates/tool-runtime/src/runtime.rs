use crate::backend::{ToolBackend, ToolCallError};
use crate::conversation::Conversation;
use crate::events::LoopEvent;
use crate::prompts;
use crate::provider::{LlmError, ToolAwareLlmProvider};
use crate::tool::{ToolCall, ToolDefinition};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The core agentic loop that orchestrates LLM ↔ Tool execution.
///
/// Flow: Question → LLM → ToolCalls → Execute → Results → LLM → ... → Final Text.
///
/// Each round queries the LLM once. Final text ends the run even when the
/// same reply also carries tool calls; a reply with neither ends it too.
/// Otherwise every tool call is executed in order, outcomes are appended to
/// the conversation, and the round counter advances. The counter starts at 1
/// and the run stops once it reaches `max_iterations`, so the LLM is queried
/// at most `max_iterations - 1` times.
pub struct AgenticLoop {
    provider: Arc<dyn ToolAwareLlmProvider>,
    backend: Arc<dyn ToolBackend>,
    tools: Vec<ToolDefinition>,
    system_prompt: String,
    max_iterations: usize,
    tool_timeout: Duration,
    retry_delay: Duration,
    events: Option<UnboundedSender<LoopEvent>>,
}

/// How a run ended. All variants are normal terminations.
///
/// `rounds` counts completed tool rounds, so an answer on the very first
/// reply reports zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The LLM returned final text.
    Answered { text: String, rounds: usize },
    /// The LLM returned neither text nor tool calls.
    Completed { rounds: usize },
    /// The round limit was reached without an answer.
    Exhausted { rounds: usize, max_iterations: usize },
}

impl AgenticLoop {
    pub fn new(
        provider: Arc<dyn ToolAwareLlmProvider>,
        backend: Arc<dyn ToolBackend>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            provider,
            backend,
            tools,
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            max_iterations: 5,
            tool_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
            events: None,
        }
    }

    /// Build a loop offering every tool the backend lists.
    pub async fn discover(
        provider: Arc<dyn ToolAwareLlmProvider>,
        backend: Arc<dyn ToolBackend>,
    ) -> Result<Self, AgenticLoopError> {
        let tools = backend
            .list_tools()
            .await
            .map_err(AgenticLoopError::ToolDiscovery)?;
        Ok(Self::new(provider, backend, tools))
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Send progress events to `tx`. A closed receiver is ignored.
    pub fn with_events(mut self, tx: UnboundedSender<LoopEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Run one user question to termination.
    ///
    /// Tool failures never end the run; they become conversation content.
    /// Only an LLM failure or `cancel` firing returns an error.
    pub async fn run(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, AgenticLoopError> {
        let mut conversation = Conversation::new(
            &self.system_prompt,
            question,
            self.tools.clone(),
            self.max_iterations,
        );

        while !conversation.is_exhausted() {
            let iteration = conversation.iteration();
            debug!(iteration, "Starting agentic loop iteration");
            self.emit(LoopEvent::RoundStarted { iteration });

            let completion = tokio::select! {
                result = self.provider.complete_with_tools(conversation.messages(), conversation.tools()) => result?,
                _ = cancel.cancelled() => return Err(AgenticLoopError::Cancelled),
            };

            if let Some(text) = completion.content.filter(|t| !t.is_empty()) {
                if !completion.tool_calls.is_empty() {
                    debug!(
                        dropped = completion.tool_calls.len(),
                        "final text present, ignoring tool calls in the same reply"
                    );
                }
                let rounds = iteration - 1;
                info!(rounds, "Agentic loop complete (final text)");
                self.emit(LoopEvent::Answer {
                    text: text.clone(),
                    rounds,
                });
                return Ok(LoopOutcome::Answered { text, rounds });
            }

            if completion.tool_calls.is_empty() {
                let rounds = iteration - 1;
                info!(rounds, "Agentic loop complete (no tool calls)");
                self.emit(LoopEvent::Completed { rounds });
                return Ok(LoopOutcome::Completed { rounds });
            }

            info!(iteration, count = completion.tool_calls.len(), "Executing tool calls");
            for call in &completion.tool_calls {
                self.dispatch(&mut conversation, iteration, call, cancel)
                    .await?;
            }

            conversation.advance();
        }

        warn!(max_iterations = self.max_iterations, "Reached maximum iterations without completing the task");
        self.emit(LoopEvent::Exhausted {
            max_iterations: self.max_iterations,
        });
        Ok(LoopOutcome::Exhausted {
            rounds: conversation.iteration().saturating_sub(1),
            max_iterations: self.max_iterations,
        })
    }

    async fn dispatch(
        &self,
        conversation: &mut Conversation,
        iteration: usize,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<(), AgenticLoopError> {
        info!(iteration, tool = %call.name, arguments = %call.arguments, "Tool call");
        self.emit(LoopEvent::ToolCallRequested {
            iteration,
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let arguments: Map<String, Value> = match serde_json::from_str(&call.arguments) {
            Ok(map) => map,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "unparseable tool arguments");
                conversation.add_system_message(prompts::argument_parse_error(&e));
                self.emit(LoopEvent::ArgumentsRejected {
                    name: call.name.clone(),
                    error: e.to_string(),
                });
                return Ok(());
            }
        };

        let invocation = tokio::time::timeout(
            self.tool_timeout,
            self.backend.call_tool(&call.name, Value::Object(arguments)),
        );
        let result = tokio::select! {
            result = invocation => result.unwrap_or(Err(ToolCallError::Timeout(self.tool_timeout))),
            _ = cancel.cancelled() => return Err(AgenticLoopError::Cancelled),
        };

        match result {
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool execution failed or timed out");
                self.emit(LoopEvent::ToolFailed {
                    name: call.name.clone(),
                    error: e.to_string(),
                });
                conversation.add_system_message(prompts::tool_failure(&e));

                self.emit(LoopEvent::RetryPause {
                    delay: self.retry_delay,
                });
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = cancel.cancelled() => return Err(AgenticLoopError::Cancelled),
                }
            }
            Ok(output) if output.is_empty() => {
                debug!(tool = %call.name, "tool returned empty content");
            }
            Ok(output) => {
                debug!(tool = %call.name, bytes = output.len(), "tool result");
                self.emit(LoopEvent::ToolSucceeded {
                    name: call.name.clone(),
                    output: output.clone(),
                });
                conversation.add_assistant_message(output);
                conversation.add_system_message(prompts::RETURN_RESULT_HINT);
            }
        }
        Ok(())
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgenticLoopError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),
    #[error("failed to list tools: {0}")]
    ToolDiscovery(ToolCallError),
    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ChatMessage, Role};
    use crate::provider::mock::MockToolAwareProvider;
    use crate::provider::Completion;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that returns scripted results and records every call.
    #[derive(Default)]
    struct ScriptedBackend {
        results: Mutex<VecDeque<Result<String, ToolCallError>>>,
        calls: Mutex<Vec<(String, Value)>>,
        hang: bool,
    }

    impl ScriptedBackend {
        fn returning(results: Vec<Result<String, ToolCallError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolBackend for ScriptedBackend {
        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolCallError> {
            Ok(vec![crate::tools::kubectl().definition()])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, ToolCallError> {
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), arguments));
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn setup(
        provider: MockToolAwareProvider,
        backend: ScriptedBackend,
    ) -> (AgenticLoop, Arc<MockToolAwareProvider>, Arc<ScriptedBackend>) {
        let provider = Arc::new(provider);
        let backend = Arc::new(backend);
        let agentic_loop = AgenticLoop::new(
            provider.clone() as Arc<dyn ToolAwareLlmProvider>,
            backend.clone() as Arc<dyn ToolBackend>,
            vec![crate::tools::kubectl().definition()],
        );
        (agentic_loop, provider, backend)
    }

    fn kubectl_call(arguments: &str) -> Completion {
        Completion::tool_call("kubectl", format!(r#"{{"arguments": "{arguments}"}}"#))
    }

    #[tokio::test]
    async fn test_final_text_on_first_round() {
        let provider = MockToolAwareProvider::new();
        provider.queue_text("All pods are running.");
        let (agentic_loop, provider, backend) = setup(provider, ScriptedBackend::default());

        let outcome = agentic_loop
            .run("are my pods ok?", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            LoopOutcome::Answered {
                text: "All pods are running.".to_string(),
                rounds: 0
            }
        );
        assert_eq!(provider.request_count(), 1);
        assert_eq!(backend.call_count(), 0);

        let first = &provider.requests()[0];
        assert_eq!(first[0].role, Role::System);
        assert_eq!(first[0].content, prompts::SYSTEM_PROMPT);
        assert_eq!(first[1], ChatMessage::user("are my pods ok?"));
    }

    #[tokio::test]
    async fn test_final_text_wins_over_tool_calls() {
        let provider = MockToolAwareProvider::new();
        let mut both = kubectl_call("get pods");
        both.content = Some("Nothing to do.".to_string());
        provider.queue(both);
        let (agentic_loop, _provider, backend) = setup(provider, ScriptedBackend::default());

        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, LoopOutcome::Answered { rounds: 0, .. }));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_text_and_no_tool_calls_completes() {
        let provider = MockToolAwareProvider::new();
        provider.queue(Completion::default());
        let (agentic_loop, _provider, _backend) = setup(provider, ScriptedBackend::default());

        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Completed { rounds: 0 });
    }

    #[tokio::test]
    async fn test_empty_text_is_not_an_answer() {
        let provider = MockToolAwareProvider::new();
        provider.queue(Completion::text(""));
        let (agentic_loop, _provider, _backend) = setup(provider, ScriptedBackend::default());

        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Completed { rounds: 0 });
    }

    #[tokio::test]
    async fn test_always_calling_tools_exhausts() {
        let provider = MockToolAwareProvider::repeating(kubectl_call("get pods"));
        let (agentic_loop, provider, backend) = setup(provider, ScriptedBackend::default());

        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert_eq!(
            outcome,
            LoopOutcome::Exhausted {
                rounds: 4,
                max_iterations: 5
            }
        );
        assert_eq!(provider.request_count(), 4);
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_custom_iteration_bound() {
        let provider = MockToolAwareProvider::repeating(kubectl_call("get pods"));
        let (agentic_loop, provider, backend) = setup(provider, ScriptedBackend::default());
        let agentic_loop = agentic_loop.with_max_iterations(2);

        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert!(matches!(outcome, LoopOutcome::Exhausted { max_iterations: 2, .. }));
        assert_eq!(provider.request_count(), 1);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_tool_result_and_hint_appended() {
        let provider = MockToolAwareProvider::new();
        provider.queue(kubectl_call("get pods -n kube-system"));
        provider.queue_text("coredns is crash-looping");
        let backend = ScriptedBackend::returning(vec![Ok("coredns CrashLoopBackOff".to_string())]);
        let (agentic_loop, provider, backend) = setup(provider, backend);

        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert_eq!(
            outcome,
            LoopOutcome::Answered {
                text: "coredns is crash-looping".to_string(),
                rounds: 1
            }
        );
        let calls = backend.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "kubectl");
        assert_eq!(calls[0].1, serde_json::json!({"arguments": "get pods -n kube-system"}));

        let second = &provider.requests()[1];
        let tail = &second[second.len() - 2..];
        assert_eq!(tail[0], ChatMessage::assistant("coredns CrashLoopBackOff"));
        assert_eq!(tail[1], ChatMessage::system(prompts::RETURN_RESULT_HINT));
    }

    #[tokio::test]
    async fn test_empty_tool_result_appends_nothing() {
        let provider = MockToolAwareProvider::new();
        provider.queue(kubectl_call("get pods"));
        provider.queue_text("done");
        let backend = ScriptedBackend::returning(vec![Ok(String::new())]);
        let (agentic_loop, provider, _backend) = setup(provider, backend);

        agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert_eq!(provider.requests()[1].len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_arguments_skip_call() {
        let provider = MockToolAwareProvider::new();
        provider.queue(Completion::tool_call("kubectl", "{not json"));
        provider.queue_text("sorry");
        let (agentic_loop, provider, backend) = setup(provider, ScriptedBackend::default());

        agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert_eq!(backend.call_count(), 0);
        let last = provider.requests()[1].last().cloned().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.content.starts_with("Error parsing tool arguments:"));
        assert!(last.content.ends_with("Please try again with valid JSON."));
    }

    #[tokio::test]
    async fn test_each_intent_dispatched_in_order() {
        let provider = MockToolAwareProvider::new();
        provider.queue(Completion {
            content: None,
            tool_calls: vec![
                ToolCall {
                    id: "a".to_string(),
                    name: "k8sgpt".to_string(),
                    arguments: r#"{"arguments": "analyze"}"#.to_string(),
                },
                ToolCall {
                    id: "b".to_string(),
                    name: "kubectl".to_string(),
                    arguments: "[]".to_string(),
                },
                ToolCall {
                    id: "c".to_string(),
                    name: "kubectl".to_string(),
                    arguments: r#"{"arguments": "get nodes"}"#.to_string(),
                },
            ],
        });
        provider.queue_text("done");
        let (agentic_loop, _provider, backend) = setup(provider, ScriptedBackend::default());

        agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        let names: Vec<_> = backend
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(n, a)| format!("{n} {}", a["arguments"].as_str().unwrap_or_default()))
            .collect();
        assert_eq!(names, vec!["k8sgpt analyze", "kubectl get nodes"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_appends_message_pauses_and_continues() {
        let provider = MockToolAwareProvider::new();
        provider.queue(kubectl_call("get pods --bogus"));
        provider.queue_text("try without the flag");
        let backend = ScriptedBackend::returning(vec![Err(ToolCallError::Failed(
            "kubectl exited with code 2: bad flag".to_string(),
        ))]);
        let (agentic_loop, provider, _backend) = setup(provider, backend);

        let started = tokio::time::Instant::now();
        let outcome = agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(matches!(outcome, LoopOutcome::Answered { rounds: 1, .. }));
        let last = provider.requests()[1].last().cloned().unwrap();
        assert_eq!(last.role, Role::System);
        assert_eq!(
            last.content,
            prompts::tool_failure(&"kubectl exited with code 2: bad flag")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_tool_times_out() {
        let provider = MockToolAwareProvider::new();
        provider.queue(kubectl_call("logs -f web"));
        provider.queue_text("gave up");
        let (agentic_loop, provider, _backend) = setup(provider, ScriptedBackend::hanging());
        let agentic_loop = agentic_loop.with_tool_timeout(Duration::from_secs(30));

        let started = tokio::time::Instant::now();
        agentic_loop.run("q", &CancellationToken::new()).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(32));
        let last = provider.requests()[1].last().cloned().unwrap();
        assert!(last.content.contains("tool call timed out after 30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_in_flight_call() {
        let provider = MockToolAwareProvider::new();
        provider.queue(kubectl_call("logs -f web"));
        let (agentic_loop, _provider, _backend) = setup(provider, ScriptedBackend::hanging());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = agentic_loop.run("q", &cancel).await.unwrap_err();
        assert!(matches!(err, AgenticLoopError::Cancelled));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let provider = MockToolAwareProvider::new();
        provider.queue(kubectl_call("get pods"));
        provider.queue_text("fine");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (agentic_loop, _provider, _backend) = setup(provider, ScriptedBackend::default());
        let agentic_loop = agentic_loop.with_events(tx);

        agentic_loop.run("q", &CancellationToken::new()).await.unwrap();
        drop(agentic_loop);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events[0], LoopEvent::RoundStarted { iteration: 1 });
        assert!(matches!(events[1], LoopEvent::ToolCallRequested { iteration: 1, .. }));
        assert!(matches!(events[2], LoopEvent::ToolSucceeded { .. }));
        assert_eq!(events[3], LoopEvent::RoundStarted { iteration: 2 });
        assert_eq!(
            events.last(),
            Some(&LoopEvent::Answer {
                text: "fine".to_string(),
                rounds: 1
            })
        );
    }

    #[tokio::test]
    async fn test_discover_uses_backend_listing() {
        let provider: Arc<dyn ToolAwareLlmProvider> = Arc::new(MockToolAwareProvider::new());
        let backend: Arc<dyn ToolBackend> = Arc::new(ScriptedBackend::default());
        let agentic_loop = AgenticLoop::discover(provider, backend).await.unwrap();
        assert_eq!(agentic_loop.tools().len(), 1);
        assert_eq!(agentic_loop.tools()[0].name, "kubectl");
    }
}
