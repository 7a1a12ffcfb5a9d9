//! Agent Loop (spec §4.I): the turn-by-turn engine tying a model backend, the
//! Context Manager, the tool pipeline, and usage tracking together. One
//! `AgentLoop` drives one conversation; `run()` advances it by one user turn,
//! issuing model calls and dispatching any requested tools until the model
//! stops calling tools or `max_iterations` is reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

use crate::backend::{classify, CircuitBreaker, CompletionRequest, CompletionResponse, ErrorClass, ModelBackend, RetryPolicy};
use crate::context::ContextManager;
use crate::error::{AgentError, ContextOverflowError, InferenceError, MaxIterationsError, ToolExecutionError};
use crate::events::AgentEvent;
use crate::message::{Message, ToolCallRequest};
use crate::tools::{ToolPipeline, ToolRegistry};
use crate::usage::UsageAggregate;

/// Per-run parameters that don't belong to any one collaborator.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Upper bound on model-call/tool-dispatch rounds within a single `run()`
    /// (spec §4.I, §8 "Max iterations").
    pub max_iterations: usize,
    /// The model's total context window, used only to annotate a fatal
    /// context-overflow error; the trigger for proactive compaction lives in
    /// `CompactionConfig` instead.
    pub context_window: u32,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            temperature: None,
            max_iterations: 25,
            context_window: 200_000,
        }
    }
}

/// The outcome of one `run()` call.
#[derive(Debug, Clone)]
pub struct AgentLoopResult {
    /// The final assistant text (the turn's last tool-free response).
    pub output: String,
    /// Every message appended to the context during this run, in order —
    /// the user input, each assistant turn, and each tool result.
    pub new_messages: Vec<Message>,
    pub usage: UsageAggregate,
    pub iterations: usize,
}

/// One dispatched tool call and the message its result produced.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub request: ToolCallRequest,
    pub result_message: Message,
}

/// The result of advancing the loop by exactly one model call (plus any
/// tool calls it requested). `run()` is a thin loop over `step()`; the ReAct
/// workflow engine drives `step()` directly so it can inspect each round for
/// its own termination condition (spec §4.J).
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The model responded with no tool calls — the turn is over.
    Done { text: String, assistant_message: Message },
    /// The model requested one or more tools; all have already been
    /// dispatched and their results appended to the context.
    ToolCalls { assistant_message: Message, calls: Vec<ToolCallOutcome> },
}

/// Drives one conversation. Owns the context, the tool pipeline, and the
/// usage log; borrows a shared backend and circuit breaker so multiple loops
/// can run concurrently against the same provider (spec §5).
pub struct AgentLoop {
    backend: Arc<dyn ModelBackend>,
    context: ContextManager,
    tools: ToolPipeline,
    usage: crate::usage::UsageTracker,
    circuit_breaker: Arc<CircuitBreaker>,
    retry_policy: RetryPolicy,
    config: AgentLoopConfig,
    events: Option<UnboundedSender<AgentEvent>>,
}

impl AgentLoop {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        context: ContextManager,
        tools: ToolPipeline,
        circuit_breaker: Arc<CircuitBreaker>,
        retry_policy: RetryPolicy,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            backend,
            context,
            tools,
            usage: crate::usage::UsageTracker::new(),
            circuit_breaker,
            retry_policy,
            config,
            events: None,
        }
    }

    /// Stream lifecycle events (tool calls, compactions, completion) to a
    /// channel, for a UI or log sink. Optional — `run()` works without it.
    pub fn with_events(mut self, sender: UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ContextManager {
        &mut self.context
    }

    pub fn usage(&self) -> &crate::usage::UsageTracker {
        &self.usage
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Advances the conversation by one user turn. Returns once the model
    /// produces a response with no tool calls, or errors out per spec §7's
    /// error-handling matrix (fatal inference errors, exhausted retries,
    /// a second context overflow after compaction, or `max_iterations`).
    #[instrument(skip(self, input), fields(model = %self.config.model))]
    pub async fn run(&mut self, input: Message) -> Result<AgentLoopResult, AgentError> {
        let mut new_messages = vec![input.clone()];
        self.context.add_message(input);

        for iteration in 0..self.config.max_iterations {
            self.emit(AgentEvent::TurnStart { turn: iteration });

            match self.step().await? {
                StepOutcome::Done { text, assistant_message } => {
                    new_messages.push(assistant_message);
                    self.emit(AgentEvent::Finished { turns: iteration + 1 });
                    return Ok(AgentLoopResult {
                        output: text,
                        new_messages,
                        usage: self.usage.total(),
                        iterations: iteration + 1,
                    });
                }
                StepOutcome::ToolCalls { assistant_message, calls } => {
                    new_messages.push(assistant_message);
                    new_messages.extend(calls.into_iter().map(|c| c.result_message));
                }
            }
        }

        self.emit(AgentEvent::Error { message: "max iterations reached".into() });
        Err(AgentError::MaxIterations(MaxIterationsError))
    }

    /// Advances the loop by exactly one model call: compacts if due, calls
    /// the backend, appends the assistant turn, and — if the model asked for
    /// tools — dispatches every one of them before returning. Exposed so the
    /// ReAct workflow engine can drive iterations itself instead of looping
    /// to completion the way `run()` does.
    pub async fn step(&mut self) -> Result<StepOutcome, AgentError> {
        if self.context.should_compact() {
            let result = self.context.compact().await;
            self.emit(AgentEvent::Compacted { pre_tokens: result.tokens_before, post_tokens: result.tokens_after });
        }

        let response = self.complete_with_overflow_handling().await?;
        self.usage.record(
            response.usage.input_tokens,
            response.usage.output_tokens,
            Some(response.model.clone()),
            None,
        );

        let assistant_message = Message::assistant(response.content.clone(), response.tool_calls.clone());
        self.context.add_message(assistant_message.clone());

        if !response.content.is_empty() {
            self.emit(AgentEvent::Text { content: response.content.clone() });
        }

        if response.tool_calls.is_empty() {
            return Ok(StepOutcome::Done { text: response.content, assistant_message });
        }

        let mut calls = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            self.emit(AgentEvent::ToolCall { name: call.name.clone(), input: call.args.clone() });
            let tool_message = self.dispatch_tool(call).await;
            self.emit(AgentEvent::ToolResult {
                name: call.name.clone(),
                output: tool_message.content.clone(),
                is_error: tool_message.is_error(),
            });
            self.context.add_message(tool_message.clone());
            calls.push(ToolCallOutcome { request: call.clone(), result_message: tool_message });
        }

        Ok(StepOutcome::ToolCalls { assistant_message, calls })
    }

    /// Runs a completion, compacting once and retrying if the backend
    /// reports the prompt no longer fits (spec §7: retryable once after
    /// compaction, fatal on a second occurrence).
    async fn complete_with_overflow_handling(&mut self) -> Result<CompletionResponse, AgentError> {
        match self.call_backend().await {
            Ok(response) => Ok(response),
            Err((e, ErrorClass::ContextOverflow)) => {
                warn!("context overflow reported by backend, compacting once and retrying");
                let result = self.context.compact().await;
                self.emit(AgentEvent::Compacted { pre_tokens: result.tokens_before, post_tokens: result.tokens_after });

                match self.call_backend().await {
                    Ok(response) => Ok(response),
                    Err((_, ErrorClass::ContextOverflow)) => Err(AgentError::ContextOverflow(ContextOverflowError {
                        current: self.context.token_count(),
                        max: self.config.context_window,
                        compaction_attempted: true,
                    })),
                    Err((e2, _)) => Err(AgentError::Inference(e2)),
                }
            }
            Err((e, _)) => Err(AgentError::Inference(e)),
        }
    }

    /// One model call, with circuit-breaker gating and the configured retry
    /// policy for transient failures. Context overflow is never retried
    /// here — the caller decides whether to compact and retry once.
    async fn call_backend(&self) -> Result<CompletionResponse, (InferenceError, ErrorClass)> {
        let mut attempt = 0;
        loop {
            if let Err(open) = self.circuit_breaker.allow_request() {
                return Err((InferenceError::CircuitOpen(open), ErrorClass::CircuitOpen));
            }

            let request = self.build_request();
            match self.backend.complete(request).await {
                Ok(response) => {
                    self.circuit_breaker.record_success();
                    return Ok(response);
                }
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    let class = classify(&e);
                    match class {
                        ErrorClass::Fatal | ErrorClass::CircuitOpen | ErrorClass::ContextOverflow => {
                            return Err((e, class));
                        }
                        ErrorClass::RetryableWithDelay | ErrorClass::RetryableBackoff => {
                            if attempt >= self.retry_policy.model_retries {
                                return Err((e, class));
                            }
                            let delay = self.retry_policy.backoff_for_attempt(attempt);
                            info!(attempt, delay, "retrying model call");
                            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    fn build_request(&self) -> CompletionRequest {
        let mut tools = self.tools.schemas();
        tools.push(ToolRegistry::search_tool_schema());

        CompletionRequest {
            model: self.config.model.clone(),
            system: self.context.history().system_prompt.clone(),
            messages: self.context.history().messages.clone(),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Executes one tool call with the configured per-tool retry budget,
    /// always returning a `tool` message — a failure after exhausting
    /// retries becomes an `is_error` result rather than aborting the loop,
    /// so the model can see and react to it (spec §4.F, §7).
    async fn dispatch_tool(&self, call: &ToolCallRequest) -> Message {
        let mut attempt = 0;
        loop {
            match self.tools.execute(&call.name, &call.args).await {
                Ok(output) => return Message::tool_result(call.id.clone(), call.name.clone(), output, false),
                Err(e) => {
                    if attempt >= self.retry_policy.tool_retries {
                        let error = ToolExecutionError::new(call.name.clone(), call.args.clone());
                        warn!(tool = %call.name, error = %e, "tool failed after exhausting retries");
                        return Message::tool_result(
                            call.id.clone(),
                            call.name.clone(),
                            format!("{error}: {e}"),
                            true,
                        );
                    }
                    let delay = self.retry_policy.backoff_for_attempt(attempt);
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CircuitBreakerConfig, CompletionChunk, FinishReason, RetryLevel};
    use crate::context::CompactionConfig;
    use crate::token::TokenCounter;
    use crate::types::Usage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    /// Replays a fixed script of responses, one per `complete()` call, so a
    /// test can script a multi-iteration exchange deterministically.
    struct ScriptedBackend {
        script: StdMutex<Vec<Result<CompletionResponse, InferenceError>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<CompletionResponse, InferenceError>>) -> Self {
            // reverse so pop() returns them in original order
            let mut reversed = script;
            reversed.reverse();
            Self { script: StdMutex::new(reversed) }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, InferenceError> {
            self.script.lock().unwrap().pop().expect("script exhausted")
        }

        async fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<mpsc::UnboundedReceiver<Result<CompletionChunk, InferenceError>>, InferenceError> {
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok(rx)
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn final_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: text.to_string(),
            tool_calls: vec![],
            usage: Usage { input_tokens: 10, output_tokens: 5 },
            model: "test-model".to_string(),
            finish_reason: FinishReason::EndTurn,
        }
    }

    fn tool_call_response(tool_name: &str, call_id: &str) -> CompletionResponse {
        CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest { id: call_id.to_string(), name: tool_name.to_string(), args: json!({}) }],
            usage: Usage { input_tokens: 10, output_tokens: 5 },
            model: "test-model".to_string(),
            finish_reason: FinishReason::ToolCalls,
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl crate::tools::ToolHandler for EchoHandler {
        async fn call(&self, _input: &serde_json::Value) -> Result<String, String> {
            Ok("echoed".to_string())
        }
    }

    fn build_loop(backend: ScriptedBackend, tools: ToolPipeline, max_iterations: usize) -> AgentLoop {
        let counter = TokenCounter::with_default_encoding();
        let context = ContextManager::new(counter, CompactionConfig::default());
        let circuit_breaker = Arc::new(CircuitBreaker::new("test", CircuitBreakerConfig::default()));
        let retry_policy = RetryPolicy::for_level(RetryLevel::Conservative);
        let config = AgentLoopConfig { max_iterations, ..AgentLoopConfig::default() };
        AgentLoop::new(Arc::new(backend), context, tools, circuit_breaker, retry_policy, config)
    }

    #[tokio::test]
    async fn zero_tool_call_response_makes_exactly_one_backend_call() {
        let backend = ScriptedBackend::new(vec![Ok(final_response("hello there"))]);
        let mut agent = build_loop(backend, ToolPipeline::new(ToolRegistry::new()), 10);

        let result = agent.run(Message::user("hi")).await.unwrap();
        assert_eq!(result.output, "hello there");
        assert_eq!(result.iterations, 1);
        // user input + assistant reply
        assert_eq!(result.new_messages.len(), 2);
    }

    #[tokio::test]
    async fn n_tool_calls_produce_n_tool_messages_in_order() {
        let backend = ScriptedBackend::new(vec![
            Ok(tool_call_response("echo", "c1")),
            Ok(final_response("done")),
        ]);
        let registry = ToolRegistry::new().add("echo", json!({"name": "echo", "description": "echoes", "input_schema": {}}), EchoHandler);
        let mut agent = build_loop(backend, ToolPipeline::new(registry), 10);

        let result = agent.run(Message::user("go")).await.unwrap();
        assert_eq!(result.output, "done");

        // user, assistant(tool call), tool result, assistant(final)
        assert_eq!(result.new_messages.len(), 4);
        assert_eq!(result.new_messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(result.new_messages[2].content, "echoed");
    }

    #[tokio::test]
    async fn usage_sums_to_the_tracked_aggregate() {
        let backend = ScriptedBackend::new(vec![
            Ok(tool_call_response("echo", "c1")),
            Ok(final_response("done")),
        ]);
        let registry = ToolRegistry::new().add("echo", json!({"name": "echo", "description": "echoes", "input_schema": {}}), EchoHandler);
        let mut agent = build_loop(backend, ToolPipeline::new(registry), 10);
        let result = agent.run(Message::user("go")).await.unwrap();

        assert_eq!(result.usage.request_count, 2);
        assert_eq!(result.usage.prompt_tokens, 20);
        assert_eq!(result.usage.completion_tokens, 10);
    }

    #[tokio::test]
    async fn exceeding_max_iterations_is_a_typed_error() {
        let backend = ScriptedBackend::new(vec![
            Ok(tool_call_response("echo", "c1")),
            Ok(tool_call_response("echo", "c2")),
        ]);
        let registry = ToolRegistry::new().add("echo", json!({"name": "echo", "description": "echoes", "input_schema": {}}), EchoHandler);
        let mut agent = build_loop(backend, ToolPipeline::new(registry), 2);

        let err = agent.run(Message::user("go")).await.unwrap_err();
        assert!(matches!(err, AgentError::MaxIterations(_)));
    }

    #[tokio::test]
    async fn fatal_inference_error_aborts_the_run() {
        let backend = ScriptedBackend::new(vec![Err(InferenceError::Authentication(
            crate::error::AuthenticationError("bad key".into()),
        ))]);
        let mut agent = build_loop(backend, ToolPipeline::new(ToolRegistry::new()), 10);

        let err = agent.run(Message::user("hi")).await.unwrap_err();
        assert!(matches!(err, AgentError::Inference(InferenceError::Authentication(_))));
    }

    #[tokio::test]
    async fn tool_failure_yields_an_error_tool_message_instead_of_aborting() {
        struct FailingHandler;
        #[async_trait]
        impl crate::tools::ToolHandler for FailingHandler {
            async fn call(&self, _input: &serde_json::Value) -> Result<String, String> {
                Err("boom".to_string())
            }
        }

        let backend = ScriptedBackend::new(vec![
            Ok(tool_call_response("fails", "c1")),
            Ok(final_response("recovered")),
        ]);
        let registry = ToolRegistry::new().add("fails", json!({"name": "fails", "description": "always fails", "input_schema": {}}), FailingHandler);
        let mut agent = build_loop(backend, ToolPipeline::new(registry), 10);

        let result = agent.run(Message::user("go")).await.unwrap();
        assert_eq!(result.output, "recovered");
        let tool_msg = &result.new_messages[2];
        assert!(tool_msg.is_error());
    }

    #[tokio::test]
    async fn events_are_emitted_for_turns_and_tool_calls() {
        let backend = ScriptedBackend::new(vec![Ok(final_response("hi back"))]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut agent = build_loop(backend, ToolPipeline::new(ToolRegistry::new()), 10).with_events(tx);

        agent.run(Message::user("hi")).await.unwrap();
        drop(agent);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.iter().any(|e| matches!(e, AgentEvent::TurnStart { turn: 0 })));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Finished { .. })));
    }
}
