use serde_json::Value;

/// Events emitted during agent execution, for UI streaming. Extended from the
/// teacher's `AgentEvent` with ReAct-level variants (§11 "Streaming events").
#[derive(Debug, Clone)]
pub enum AgentEvent {
    TurnStart { turn: usize },
    Thinking { content: String },
    Text { content: String },
    ToolCall { name: String, input: Value },
    ToolResult { name: String, output: String, is_error: bool },
    Compacted { pre_tokens: u32, post_tokens: u32 },
    Finished { turns: usize },
    Error { message: String },

    /// A ReAct iteration has started.
    IterationStart { iteration: usize },
    /// A Thought was extracted from assistant text (only when `expose_reasoning`).
    Thought { content: String },
    /// An Observation was recorded for a tool result.
    Observation { content: String, is_error: bool },
}
