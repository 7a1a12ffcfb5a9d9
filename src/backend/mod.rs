//! Model Backend boundary (spec §4.H): the abstract surface every LLM
//! provider implements, plus the retry policy and circuit breaker that guard
//! calls through it.

mod circuit_breaker;
mod retry;

pub mod anthropic;
pub mod openai_compat;

pub use anthropic::AnthropicBackend;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use openai_compat::OpenAiCompatBackend;
pub use retry::{classify, ErrorClass, RetryLevel, RetryPolicy};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::InferenceError;
use crate::message::{Message, ToolCallRequest};
use crate::types::Usage;

/// One inference request, backend-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
}

/// How the model stopped generating, independent of wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EndTurn,
    ToolCalls,
    MaxTokens,
}

/// A complete, non-streamed response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
    pub model: String,
    pub finish_reason: FinishReason,
}

/// One increment of a streamed response.
#[derive(Debug, Clone, Default)]
pub struct CompletionChunk {
    pub content_delta: String,
    pub tool_calls_delta: Vec<ToolCallRequest>,
    pub is_final: bool,
    pub usage: Option<Usage>,
}

/// Abstract operations every model provider implements (spec §4.H).
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Human-readable name used to key the circuit-breaker table.
    fn name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, InferenceError>;

    /// Streams the response a chunk at a time via an unbounded channel (no
    /// `futures` dependency needed — `tokio::sync::mpsc` is already in the
    /// stack). The channel closes after the final chunk or first error.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<Result<CompletionChunk, InferenceError>>, InferenceError>;

    async fn health_check(&self) -> bool;
}
