//! Agent runtime: a turn-by-turn Agent Loop over a pluggable model backend,
//! a Context Compaction engine that keeps the conversation inside its token
//! budget, a ReAct Workflow Engine built on top of the loop, and a tool/MCP
//! layer the model reaches through.
//!
//! [`agent_loop`] is the entry point for most callers: construct an
//! [`AgentLoop`] from a [`backend::ModelBackend`], a [`context::ContextManager`],
//! and a [`tools::ToolPipeline`], then call [`AgentLoop::run`] per user turn.
//! [`react`] wraps the same loop for tasks that need an explicit
//! thought/action/observation structure and a single terminating tool call.

pub mod agent_loop;
pub mod backend;
pub mod compaction;
pub mod config;
pub mod context;
pub mod decorator;
pub mod error;
pub mod events;
pub mod mcp;
pub mod message;
pub mod react;
pub mod session;
pub mod token;
pub mod tools;
pub mod types;
pub mod usage;

pub use agent_loop::{AgentLoop, AgentLoopConfig, AgentLoopResult, StepOutcome, ToolCallOutcome};
pub use backend::{
    AnthropicBackend, CircuitBreaker, CircuitBreakerConfig, CompletionRequest, CompletionResponse,
    ErrorClass, FinishReason, ModelBackend, OpenAiCompatBackend, RetryLevel, RetryPolicy,
};
pub use compaction::{CompactionResult, CompactionStrategy, StrategyKind};
pub use config::{ModelBackendConfig, RuntimeConfig};
pub use context::{CompactionConfig, ContextManager};
pub use error::{AgentError, InferenceError, ReActError};
pub use events::AgentEvent;
pub use message::{Message, MessageHistory, Role, ToolCallRequest};
pub use react::{ReActConfig, ReActHooks, ReActResult, ReActState, ReActWorkflow};
pub use session::{FileSessionManager, NoSessionManager, SessionManager, SessionState};
pub use tools::{ToolHandler, ToolPipeline, ToolRegistry};
pub use types::Usage;
pub use usage::{UsageAggregate, UsageTracker};
