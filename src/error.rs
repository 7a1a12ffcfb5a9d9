//! Error taxonomy (spec §6, §7, §10.2). One `thiserror` enum per subsystem
//! boundary, following the teacher's `AgentError`/`InferenceError` split.

use serde_json::Value;

#[derive(Debug, Clone, thiserror::Error)]
#[error("authentication failed: {0}")]
pub struct AuthenticationError(pub String);

#[derive(Debug, Clone, thiserror::Error)]
#[error("rate limited{}", .retry_after.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
pub struct RateLimitError {
    pub retry_after: Option<f64>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("model backend error (status {status_code}): {message}")]
pub struct ModelBackendError {
    pub status_code: u16,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("context overflow: {current} tokens exceeds max {max} (compaction attempted: {compaction_attempted})")]
pub struct ContextOverflowError {
    pub current: u32,
    pub max: u32,
    pub compaction_attempted: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("tool '{tool_name}' failed")]
pub struct ToolExecutionError {
    pub tool_name: String,
    /// Arguments with keys matching `/key|secret/i` redacted before attaching.
    pub args: Value,
}

impl ToolExecutionError {
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args: crate::decorator::redaction::redact_json_keys(args),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("MCP error for server '{server_name}': {message}")]
pub struct MCPError {
    pub server_name: String,
    pub url: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("timeout after {timeout_seconds}s during {operation}")]
pub struct TimeoutError {
    pub timeout_seconds: f64,
    pub operation: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("configuration error for '{config_key}': expected {expected}, got {actual}")]
pub struct ConfigurationError {
    pub config_key: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit '{name}' is open, retry in {time_until_retry:.1}s")]
pub struct CircuitBreakerOpenError {
    pub name: String,
    pub time_until_retry: f64,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("exceeded max iterations")]
pub struct MaxIterationsError;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Backend(#[from] ModelBackendError),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerOpenError),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("agent cancelled")]
    Cancelled,
    #[error("agent timed out")]
    Timeout(#[from] TimeoutError),
    #[error("session error: {0}")]
    Session(String),
    #[error("context error: {0}")]
    Context(String),
    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflowError),
    #[error(transparent)]
    MaxIterations(#[from] MaxIterationsError),
    #[error(transparent)]
    Mcp(#[from] MCPError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReActError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    MaxIterations(#[from] MaxIterationsError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("unhandled error during workflow: {0}")]
    Unhandled(String),
}
