//! ReAct Workflow Engine (spec §4.J): Thought/Action/Observation loop built
//! on top of the Agent Loop. Grounded on
//! `original_source/.../workflows/react/{config,state,hooks,termination}.py`
//! — field names, defaults, and the scratchpad/hook shapes below follow that
//! implementation; the message-inspection termination logic is reworked
//! around this crate's canonical `Message`/`ToolCallRequest` types instead of
//! imitating the original's `pydantic_ai` message parts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{instrument, warn};

use crate::agent_loop::{AgentLoop, StepOutcome};
use crate::error::{AgentError, MaxIterationsError, ReActError, TimeoutError};
use crate::message::Message;
use crate::tools::{ToolHandler, ToolRegistry};

/// MVP termination is tool-based only (spec §4.J / §9 Open Question):
/// the run ends when the model calls `final_answer_tool_name`.
/// Confidence-based termination is deferred, as in the original.
#[derive(Debug, Clone)]
pub struct ReActConfig {
    pub max_steps: usize,
    pub max_iterations: usize,
    pub timeout_seconds: Option<f64>,
    pub step_timeout_seconds: Option<f64>,
    pub enable_hooks: bool,
    pub track_state: bool,

    pub expose_reasoning: bool,
    pub reasoning_prefix: String,
    pub action_prefix: String,
    pub observation_prefix: String,
    pub final_answer_tool_name: String,
    pub auto_compact_in_workflow: bool,
    pub compact_threshold_ratio: f64,
    pub max_consecutive_thoughts: usize,
    pub include_scratchpad: bool,
    pub tool_retry_count: u32,
}

impl Default for ReActConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_iterations: 10,
            timeout_seconds: Some(300.0),
            step_timeout_seconds: Some(30.0),
            enable_hooks: true,
            track_state: true,

            expose_reasoning: true,
            reasoning_prefix: "Thought: ".to_string(),
            action_prefix: "Action: ".to_string(),
            observation_prefix: "Observation: ".to_string(),
            final_answer_tool_name: "final_answer".to_string(),
            auto_compact_in_workflow: true,
            compact_threshold_ratio: 0.8,
            max_consecutive_thoughts: 3,
            include_scratchpad: true,
            tool_retry_count: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScratchpadEntryType {
    Thought,
    Action,
    Observation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    pub entry_type: ScratchpadEntryType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: u32,
    #[serde(default)]
    pub metadata: Value,
}

/// Everything the workflow tracks about one run: the task, the running
/// scratchpad, and termination bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActState {
    pub task: String,
    pub scratchpad: Vec<ScratchpadEntry>,
    pub current_thought: Option<String>,
    pub current_action: Option<String>,
    pub current_observation: Option<String>,
    pub is_terminated: bool,
    pub termination_reason: Option<String>,
    pub final_answer: Option<String>,
    pub iteration_token_counts: Vec<u32>,
    pub total_tokens_used: u32,
    pub compaction_count: u32,
    pub consecutive_thought_count: u32,
}

impl ReActState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            scratchpad: Vec::new(),
            current_thought: None,
            current_action: None,
            current_observation: None,
            is_terminated: false,
            termination_reason: None,
            final_answer: None,
            iteration_token_counts: Vec::new(),
            total_tokens_used: 0,
            compaction_count: 0,
            consecutive_thought_count: 0,
        }
    }

    pub fn add_thought(&mut self, thought: impl Into<String>, token_count: u32) {
        let content = thought.into();
        self.current_thought = Some(content.clone());
        self.scratchpad.push(ScratchpadEntry {
            entry_type: ScratchpadEntryType::Thought,
            content,
            timestamp: Utc::now(),
            token_count,
            metadata: Value::Null,
        });
        self.consecutive_thought_count += 1;
    }

    pub fn add_action(&mut self, action: impl Into<String>, token_count: u32, metadata: Value) {
        let content = action.into();
        self.current_action = Some(content.clone());
        self.scratchpad.push(ScratchpadEntry {
            entry_type: ScratchpadEntryType::Action,
            content,
            timestamp: Utc::now(),
            token_count,
            metadata,
        });
        self.consecutive_thought_count = 0;
    }

    pub fn add_observation(&mut self, observation: impl Into<String>, token_count: u32, metadata: Value) {
        let content = observation.into();
        self.current_observation = Some(content.clone());
        self.scratchpad.push(ScratchpadEntry {
            entry_type: ScratchpadEntryType::Observation,
            content,
            timestamp: Utc::now(),
            token_count,
            metadata,
        });
    }

    pub fn get_scratchpad_text(&self, config: &ReActConfig) -> String {
        self.scratchpad
            .iter()
            .map(|entry| {
                let prefix = match entry.entry_type {
                    ScratchpadEntryType::Thought => &config.reasoning_prefix,
                    ScratchpadEntryType::Action => &config.action_prefix,
                    ScratchpadEntryType::Observation => &config.observation_prefix,
                };
                format!("{prefix}{}", entry.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn get_thoughts(&self) -> Vec<&ScratchpadEntry> {
        self.scratchpad.iter().filter(|e| e.entry_type == ScratchpadEntryType::Thought).collect()
    }

    pub fn get_actions(&self) -> Vec<&ScratchpadEntry> {
        self.scratchpad.iter().filter(|e| e.entry_type == ScratchpadEntryType::Action).collect()
    }

    pub fn get_observations(&self) -> Vec<&ScratchpadEntry> {
        self.scratchpad.iter().filter(|e| e.entry_type == ScratchpadEntryType::Observation).collect()
    }
}

/// Observability hooks for the workflow, mirroring the original's
/// `ReActHooks`. Every method defaults to a no-op; a hook that returns an
/// error is logged and swallowed rather than aborting the run (spec §4.J —
/// observability must never itself fail the workflow).
#[async_trait]
pub trait ReActHooks: Send + Sync {
    async fn on_workflow_start(&self, _state: &ReActState) -> Result<(), String> {
        Ok(())
    }
    async fn on_workflow_complete(&self, _state: &ReActState, _result: &str) -> Result<(), String> {
        Ok(())
    }
    async fn on_workflow_error(&self, _state: &ReActState, _error: &str) -> Result<(), String> {
        Ok(())
    }
    async fn on_step_start(&self, _state: &ReActState, _step: usize) -> Result<(), String> {
        Ok(())
    }
    async fn on_step_complete(&self, _state: &ReActState, _step: usize) -> Result<(), String> {
        Ok(())
    }
    async fn on_step_error(&self, _state: &ReActState, _step: usize, _error: &str) -> Result<(), String> {
        Ok(())
    }
    async fn on_iteration_start(&self, _state: &ReActState, _iteration: usize) -> Result<(), String> {
        Ok(())
    }
    async fn on_iteration_complete(&self, _state: &ReActState, _iteration: usize) -> Result<(), String> {
        Ok(())
    }
    async fn on_thought(&self, _state: &ReActState, _thought: &str) -> Result<(), String> {
        Ok(())
    }
    async fn on_action(&self, _state: &ReActState, _tool_name: &str, _tool_args: &Value) -> Result<(), String> {
        Ok(())
    }
    async fn on_observation(&self, _state: &ReActState, _observation: &str, _is_error: bool) -> Result<(), String> {
        Ok(())
    }
    async fn on_compaction(&self, _pre_tokens: u32, _post_tokens: u32) -> Result<(), String> {
        Ok(())
    }
}

/// A `ReActHooks` that does nothing and never fails — the workflow's default.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl ReActHooks for NoopHooks {}

async fn trigger<F, Fut>(config: &ReActConfig, name: &'static str, hook_call: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    if !config.enable_hooks {
        return;
    }
    if let Err(e) = hook_call().await {
        warn!(hook = name, error = %e, "hook returned an error, continuing");
    }
}

/// A no-op tool: its only purpose is to appear in the model's tool list as
/// the designated termination signal. The workflow loop inspects each
/// iteration's tool calls for this name rather than relying on its output.
struct FinalAnswerHandler;

#[async_trait]
impl ToolHandler for FinalAnswerHandler {
    async fn call(&self, input: &Value) -> Result<String, String> {
        Ok(input
            .get("answer")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string()))
    }
}

fn final_answer_tool_schema(name: &str) -> Value {
    json!({
        "name": name,
        "description": "Call this when you have the final answer to the task. Ends the run.",
        "input_schema": {
            "type": "object",
            "properties": { "answer": { "type": "string", "description": "The final answer to the task" } },
            "required": ["answer"]
        }
    })
}

/// Registers the synthetic final-answer tool on a registry before it is
/// wired into an `AgentLoop` — callers build their `ToolRegistry` with this
/// before constructing the `ToolPipeline`/`AgentLoop` passed to
/// `ReActWorkflow::new`.
pub fn with_final_answer_tool(registry: ToolRegistry, tool_name: &str) -> ToolRegistry {
    registry.add(tool_name.to_string(), final_answer_tool_schema(tool_name), FinalAnswerHandler)
}

/// The outcome of a completed run.
#[derive(Debug, Clone)]
pub struct ReActResult {
    pub final_answer: String,
    pub state: ReActState,
    pub iterations: usize,
}

/// Wraps an `AgentLoop`, driving it one iteration at a time and applying the
/// ReAct-specific bookkeeping: scratchpad entries, hooks, and final-answer
/// termination. The wrapped `AgentLoop` must already have
/// `with_final_answer_tool` applied to its registry.
pub struct ReActWorkflow {
    agent: AgentLoop,
    config: ReActConfig,
    hooks: Arc<dyn ReActHooks>,
}

impl ReActWorkflow {
    pub fn new(agent: AgentLoop, config: ReActConfig) -> Self {
        Self { agent, config, hooks: Arc::new(NoopHooks) }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ReActHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    /// Runs the task to termination: `final_answer_tool_name` is called, the
    /// configured `max_iterations`/`max_steps` is exceeded, or the overall
    /// `timeout_seconds` elapses (spec §4.J's termination/failure matrix).
    #[instrument(skip(self, task), fields(tool = %self.config.final_answer_tool_name))]
    pub async fn run(&mut self, task: impl Into<String>) -> Result<ReActResult, ReActError> {
        let mut state = ReActState::new(task);
        trigger(&self.config, "on_workflow_start", || self.hooks.on_workflow_start(&state)).await;

        let run_future = self.run_inner(&mut state);
        let outcome = match self.config.timeout_seconds {
            Some(secs) => tokio::time::timeout(std::time::Duration::from_secs_f64(secs), run_future)
                .await
                .map_err(|_| {
                    ReActError::Timeout(TimeoutError { timeout_seconds: secs, operation: "react_workflow".into() })
                })?,
            None => run_future.await,
        };

        match &outcome {
            Ok(result) => {
                trigger(&self.config, "on_workflow_complete", || {
                    self.hooks.on_workflow_complete(&state, &result.final_answer)
                })
                .await;
            }
            Err(e) => {
                let message = e.to_string();
                trigger(&self.config, "on_workflow_error", || self.hooks.on_workflow_error(&state, &message)).await;
            }
        }

        outcome
    }

    async fn run_inner(&mut self, state: &mut ReActState) -> Result<ReActResult, ReActError> {
        let max_iterations = self.config.max_iterations.min(self.config.max_steps);

        for iteration in 0..max_iterations {
            trigger(&self.config, "on_iteration_start", || self.hooks.on_iteration_start(state, iteration)).await;

            if self.config.auto_compact_in_workflow {
                let gate = (self.config.compact_threshold_ratio
                    * self.agent.context().trigger_threshold_tokens() as f64) as u32;
                if self.agent.context().token_count() >= gate {
                    let result = self.agent.context_mut().compact().await;
                    state.compaction_count += 1;
                    trigger(&self.config, "on_compaction", || {
                        self.hooks.on_compaction(result.tokens_before, result.tokens_after)
                    })
                    .await;
                }
            }

            let force_action =
                state.consecutive_thought_count >= self.config.max_consecutive_thoughts as u32;

            // Only the first iteration seeds the conversation with the raw
            // task; later iterations replay the scratchpad (if configured)
            // plus either a "continue" nudge or, once the model has thought
            // too many times in a row without acting, an explicit instruction
            // to call a tool (spec §4.J steps 3-4).
            let input = if iteration == 0 {
                Message::user(state.task.clone())
            } else {
                let mut prompt = String::new();
                if self.config.include_scratchpad {
                    prompt.push_str(&state.get_scratchpad_text(&self.config));
                    prompt.push_str("\n\n");
                }
                if force_action {
                    prompt.push_str(
                        "You have reasoned for several steps without acting. You must call a tool now.",
                    );
                } else {
                    prompt.push_str("Continue.");
                }
                Message::user(prompt)
            };
            self.agent.context_mut().add_message(input);

            let step_result = match self.config.step_timeout_seconds {
                Some(secs) => match tokio::time::timeout(Duration::from_secs_f64(secs), self.agent.step()).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(ReActError::Timeout(TimeoutError {
                            timeout_seconds: secs,
                            operation: "react_step".to_string(),
                        }));
                    }
                },
                None => self.agent.step().await,
            };

            let outcome = match step_result {
                Ok(outcome) => outcome,
                Err(AgentError::MaxIterations(_)) => {
                    return Err(ReActError::MaxIterations(MaxIterationsError));
                }
                Err(e) => {
                    let message = e.to_string();
                    trigger(&self.config, "on_step_error", || self.hooks.on_step_error(state, iteration, &message))
                        .await;
                    return Err(ReActError::Agent(e));
                }
            };

            state.iteration_token_counts.push(self.agent.usage().total().total_tokens as u32);
            state.total_tokens_used = self.agent.usage().total().total_tokens as u32;

            match outcome {
                StepOutcome::Done { text, .. } => {
                    // No tool call at all: per spec §4.J, `final_answer` is the
                    // *only* completion signal. Record the reply as a Thought
                    // and keep iterating instead of terminating on it.
                    if self.config.expose_reasoning && !text.is_empty() {
                        state.add_thought(text.clone(), 0);
                        trigger(&self.config, "on_thought", || self.hooks.on_thought(state, &text)).await;
                    }
                    trigger(&self.config, "on_iteration_complete", || {
                        self.hooks.on_iteration_complete(state, iteration)
                    })
                    .await;
                }
                StepOutcome::ToolCalls { assistant_message, calls } => {
                    if self.config.expose_reasoning && !assistant_message.content.is_empty() {
                        state.add_thought(assistant_message.content.clone(), 0);
                        trigger(&self.config, "on_thought", || {
                            self.hooks.on_thought(state, &assistant_message.content)
                        })
                        .await;
                    }

                    for call in &calls {
                        state.add_action(
                            format!("{}({})", call.request.name, call.request.args),
                            0,
                            json!({"tool": call.request.name, "args": call.request.args}),
                        );
                        trigger(&self.config, "on_action", || {
                            self.hooks.on_action(state, &call.request.name, &call.request.args)
                        })
                        .await;

                        let is_error = call.result_message.is_error();
                        state.add_observation(call.result_message.content.clone(), 0, Value::Null);
                        trigger(&self.config, "on_observation", || {
                            self.hooks.on_observation(state, &call.result_message.content, is_error)
                        })
                        .await;

                        if call.request.name == self.config.final_answer_tool_name {
                            let answer = call
                                .request
                                .args
                                .get("answer")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| call.request.args.to_string());
                            state.is_terminated = true;
                            state.termination_reason = Some("final_answer_tool".to_string());
                            state.final_answer = Some(answer.clone());
                            trigger(&self.config, "on_step_complete", || {
                                self.hooks.on_step_complete(state, iteration)
                            })
                            .await;
                            return Ok(ReActResult {
                                final_answer: answer,
                                iterations: iteration + 1,
                                state: state.clone(),
                            });
                        }
                    }

                    trigger(&self.config, "on_iteration_complete", || {
                        self.hooks.on_iteration_complete(state, iteration)
                    })
                    .await;
                }
            }
        }

        state.is_terminated = true;
        state.termination_reason = Some("max_iterations".to_string());
        Err(ReActError::MaxIterations(MaxIterationsError))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::AgentLoopConfig;
    use crate::backend::{CircuitBreaker, CircuitBreakerConfig, CompletionChunk, CompletionRequest, CompletionResponse, FinishReason, ModelBackend, RetryLevel, RetryPolicy};
    use crate::context::{CompactionConfig, ContextManager};
    use crate::error::InferenceError;
    use crate::message::ToolCallRequest;
    use crate::token::TokenCounter;
    use crate::tools::ToolPipeline;
    use crate::types::Usage;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct ScriptedBackend {
        script: StdMutex<Vec<CompletionResponse>>,
    }

    impl ScriptedBackend {
        fn new(mut script: Vec<CompletionResponse>) -> Self {
            script.reverse();
            Self { script: StdMutex::new(script) }
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, InferenceError> {
            Ok(self.script.lock().unwrap().pop().expect("script exhausted"))
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

    fn make_workflow(responses: Vec<CompletionResponse>, config: ReActConfig) -> ReActWorkflow {
        let registry = with_final_answer_tool(ToolRegistry::new(), &config.final_answer_tool_name);
        let tools = ToolPipeline::new(registry);
        let counter = TokenCounter::with_default_encoding();
        let context = ContextManager::new(counter, CompactionConfig::default());
        let circuit_breaker = Arc::new(CircuitBreaker::new("test", CircuitBreakerConfig::default()));
        let retry_policy = RetryPolicy::for_level(RetryLevel::Conservative);
        let loop_config = AgentLoopConfig { max_iterations: 50, ..AgentLoopConfig::default() };
        let agent = AgentLoop::new(
            Arc::new(ScriptedBackend::new(responses)),
            context,
            tools,
            circuit_breaker,
            retry_policy,
            loop_config,
        );
        ReActWorkflow::new(agent, config)
    }

    fn final_answer_response(answer: &str) -> CompletionResponse {
        CompletionResponse {
            content: "I know the answer now.".to_string(),
            tool_calls: vec![ToolCallRequest {
                id: "fa1".to_string(),
                name: "final_answer".to_string(),
                args: json!({"answer": answer}),
            }],
            usage: Usage { input_tokens: 10, output_tokens: 5 },
            model: "test-model".to_string(),
            finish_reason: FinishReason::ToolCalls,
        }
    }

    #[tokio::test]
    async fn terminates_on_final_answer_tool() {
        let mut workflow = make_workflow(vec![final_answer_response("42")], ReActConfig::default());
        let result = workflow.run("what is the answer?").await.unwrap();
        assert_eq!(result.final_answer, "42");
        assert!(result.state.is_terminated);
        assert_eq!(result.state.termination_reason.as_deref(), Some("final_answer_tool"));
    }

    /// A hook that snapshots the scratchpad/termination reason it saw at
    /// workflow-error time, so a test can inspect state that the `Err` return
    /// value of `run()` doesn't itself carry.
    #[derive(Default)]
    struct CaptureOnError {
        thought_count: StdMutex<usize>,
        reason: StdMutex<Option<String>>,
    }

    #[async_trait]
    impl ReActHooks for CaptureOnError {
        async fn on_workflow_error(&self, state: &ReActState, _error: &str) -> Result<(), String> {
            *self.thought_count.lock().unwrap() = state.get_thoughts().len();
            *self.reason.lock().unwrap() = state.termination_reason.clone();
            Ok(())
        }
    }

    #[tokio::test]
    async fn hits_max_iterations_without_final_answer() {
        // Backend always returns a Thought with no tool calls (spec §8
        // scenario 6): since `final_answer` is the only completion signal,
        // the workflow must keep iterating on plain text, not terminate.
        let still_thinking = || CompletionResponse {
            content: "still thinking".to_string(),
            tool_calls: vec![],
            usage: Usage { input_tokens: 5, output_tokens: 2 },
            model: "test-model".to_string(),
            finish_reason: FinishReason::EndTurn,
        };

        let mut config = ReActConfig::default();
        config.max_iterations = 3;
        let hook = Arc::new(CaptureOnError::default());
        let mut workflow =
            make_workflow(vec![still_thinking(), still_thinking(), still_thinking()], config)
                .with_hooks(hook.clone());

        let err = workflow.run("loop forever").await.unwrap_err();
        assert!(matches!(err, ReActError::MaxIterations(_)));
        assert_eq!(*hook.thought_count.lock().unwrap(), 3);
        assert_eq!(hook.reason.lock().unwrap().as_deref(), Some("max_iterations"));
    }

    #[test]
    fn scratchpad_groups_entries_by_type() {
        let mut state = ReActState::new("task");
        state.add_thought("thinking", 3);
        state.add_action("call tool", 2, Value::Null);
        state.add_observation("result", 4, Value::Null);
        assert_eq!(state.get_thoughts().len(), 1);
        assert_eq!(state.get_actions().len(), 1);
        assert_eq!(state.get_observations().len(), 1);
        assert_eq!(state.consecutive_thought_count, 0, "reset after the action");
    }

    #[test]
    fn scratchpad_text_uses_configured_prefixes() {
        let config = ReActConfig::default();
        let mut state = ReActState::new("task");
        state.add_thought("hm", 1);
        let text = state.get_scratchpad_text(&config);
        assert!(text.starts_with("Thought: hm"));
    }
}
