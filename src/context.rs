//! Context Manager (spec §4.E): the single place that decides what the model
//! sees on the next turn. Owns one `MessageHistory`, one `TokenCounter`, one
//! configured `CompactionStrategy`, and drives compaction when the stored
//! history crosses `trigger_threshold_tokens`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compaction::{
    CompactionOptions, CompactionResult, CompactionStrategy, HybridStrategy, ImportanceStrategy,
    SelectivePruningStrategy, SlidingWindowStrategy, StrategyKind, SummarizeOlderStrategy,
    Summarizer,
};
use crate::error::AgentError;
use crate::message::{Message, MessageHistory, Role};
use crate::token::TokenCounter;

/// Spec §6 "Context" surface: which strategy to run and when.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    pub strategy_kind: StrategyKind,
    pub trigger_threshold_tokens: u32,
    pub target_tokens: u32,
    pub preserve_recent_turns: usize,
    pub preserve_system_prompt: bool,
    pub summarization_model: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy_kind: StrategyKind::SlidingWindow,
            trigger_threshold_tokens: 100_000,
            target_tokens: 70_000,
            preserve_recent_turns: 3,
            preserve_system_prompt: true,
            summarization_model: None,
        }
    }
}

/// A compaction that could not bring the history under `target_tokens`
/// because a message inside the preserve window alone exceeds it. Recorded
/// rather than surfaced as an error (spec §4.E, §7) — the run continues with
/// a best-effort reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsatisfiableCompaction {
    pub tokens_after: u32,
    pub target_tokens: u32,
}

/// Serializable record of one completed compaction pass, kept for
/// introspection and session persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub strategy: String,
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub removed_count: usize,
}

impl From<&CompactionResult> for CompactionRecord {
    fn from(result: &CompactionResult) -> Self {
        Self {
            strategy: result.strategy.clone(),
            tokens_before: result.tokens_before,
            tokens_after: result.tokens_after,
            removed_count: result.removed_count,
        }
    }
}

/// Point-in-time view of the manager's state, for diagnostics and session
/// checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextState {
    pub history: MessageHistory,
    pub token_count: u32,
    pub compaction_history: Vec<CompactionRecord>,
    pub unsatisfiable: Vec<UnsatisfiableCompaction>,
}

/// Builds the configured `CompactionStrategy` for a `StrategyKind`. `summarizer`
/// is only consulted for `SummarizeOlder`; hybrid always runs
/// selective-pruning then sliding-window, per spec §4.D's stated default.
pub fn build_strategy(
    kind: StrategyKind,
    summarizer: Option<Arc<dyn Summarizer>>,
) -> Box<dyn CompactionStrategy> {
    match kind {
        StrategyKind::SlidingWindow => Box::new(SlidingWindowStrategy),
        StrategyKind::SelectivePruning => Box::new(SelectivePruningStrategy),
        StrategyKind::Importance => Box::new(ImportanceStrategy::default()),
        StrategyKind::SummarizeOlder => {
            let summarizer = summarizer.unwrap_or_else(|| Arc::new(HeuristicSummarizer));
            Box::new(SummarizeOlderStrategy::new(summarizer))
        }
        StrategyKind::Hybrid => Box::new(HybridStrategy::new(vec![
            Box::new(SelectivePruningStrategy),
            Box::new(SlidingWindowStrategy),
        ])),
    }
}

/// Deterministic summarizer used when no model-backed one is configured:
/// the first three user-message prefixes plus a distinct-tool-names list,
/// per spec §4.D's fallback definition.
#[derive(Debug, Default)]
pub struct HeuristicSummarizer;

#[async_trait::async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize(&self, messages: &[Message]) -> Result<String, crate::error::InferenceError> {
        let user_prefixes: Vec<String> = messages
            .iter()
            .filter(|m| matches!(m.role, Role::User))
            .take(3)
            .map(|m| m.content.chars().take(120).collect::<String>())
            .collect();

        let mut tool_names: Vec<&str> = messages
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.name.as_str()))
            .collect();
        tool_names.sort_unstable();
        tool_names.dedup();

        let mut summary = String::from("[Previous conversation summary: ");
        if user_prefixes.is_empty() {
            summary.push_str("no user messages");
        } else {
            summary.push_str(&user_prefixes.join(" / "));
        }
        if !tool_names.is_empty() {
            summary.push_str(&format!(" — tools used: {}", tool_names.join(", ")));
        }
        summary.push(']');
        Ok(summary)
    }
}

/// Owns everything the model sees: the message history, the compaction
/// strategy that keeps it within budget, and the bookkeeping that goes with
/// it.
pub struct ContextManager {
    history: MessageHistory,
    counter: TokenCounter,
    strategy: Box<dyn CompactionStrategy>,
    config: CompactionConfig,
    compaction_history: Vec<CompactionRecord>,
    unsatisfiable: Vec<UnsatisfiableCompaction>,
}

impl ContextManager {
    pub fn new(counter: TokenCounter, config: CompactionConfig) -> Self {
        let strategy = build_strategy(config.strategy_kind, None);
        Self {
            history: MessageHistory::new(),
            counter,
            strategy,
            config,
            compaction_history: Vec::new(),
            unsatisfiable: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn CompactionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.history.system_prompt = Some(prompt.into());
        self
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Routes system messages to the dedicated slot (if
    /// `preserve_system_prompt` is set), everything else into the store.
    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            if self.config.preserve_system_prompt && matches!(message.role, Role::System) {
                self.history.system_prompt = Some(message.content);
            } else {
                self.history.add(message);
            }
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.add_messages(std::iter::once(message));
    }

    /// Sum of stored messages plus the system prompt.
    pub fn token_count(&self) -> u32 {
        let mut total = self.counter.count_messages(&self.history.messages);
        if let Some(system) = &self.history.system_prompt {
            total += self.counter.count(system);
        }
        total
    }

    pub fn should_compact(&self) -> bool {
        self.token_count() >= self.config.trigger_threshold_tokens
    }

    /// The configured trigger threshold, for callers (the ReAct workflow's
    /// mid-run compaction gate) that need to compare against a fraction of it
    /// rather than calling `should_compact()` directly.
    pub fn trigger_threshold_tokens(&self) -> u32 {
        self.config.trigger_threshold_tokens
    }

    /// Runs the configured strategy, replacing the store's messages with the
    /// result and appending to `compaction_history`. A no-op (empty removal)
    /// result is still recorded, so callers can distinguish "tried and
    /// nothing qualified" from "never ran".
    pub async fn compact(&mut self) -> CompactionResult {
        let options = CompactionOptions {
            target_tokens: self.config.target_tokens,
            preserve_recent_turns: self.config.preserve_recent_turns,
            preserve_system_prompt: self.config.preserve_system_prompt,
        };
        let result = self
            .strategy
            .compact(&self.history, &self.counter, &options)
            .await;

        self.history = result.history.clone();
        self.compaction_history.push(CompactionRecord::from(&result));

        if result.tokens_after > self.config.target_tokens {
            self.unsatisfiable.push(UnsatisfiableCompaction {
                tokens_after: result.tokens_after,
                target_tokens: self.config.target_tokens,
            });
        }

        result
    }

    pub fn state(&self) -> ContextState {
        ContextState {
            history: self.history.clone(),
            token_count: self.token_count(),
            compaction_history: self.compaction_history.clone(),
            unsatisfiable: self.unsatisfiable.clone(),
        }
    }

    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self.state()).expect("ContextState is always representable as JSON")
    }

    pub fn restore(&mut self, snapshot: &Value) -> Result<(), AgentError> {
        let state: ContextState = serde_json::from_value(snapshot.clone())
            .map_err(|e| AgentError::Context(format!("invalid context snapshot: {e}")))?;
        self.history = state.history;
        self.compaction_history = state.compaction_history;
        self.unsatisfiable = state.unsatisfiable;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(trigger: u32, target: u32) -> ContextManager {
        let counter = TokenCounter::with_default_encoding();
        let config = CompactionConfig {
            strategy_kind: StrategyKind::SlidingWindow,
            trigger_threshold_tokens: trigger,
            target_tokens: target,
            preserve_recent_turns: 1,
            preserve_system_prompt: true,
            summarization_model: None,
        };
        ContextManager::new(counter, config)
    }

    #[test]
    fn system_messages_route_to_the_dedicated_slot() {
        let mut ctx = manager(1_000_000, 1);
        ctx.add_message(Message::system("be helpful"));
        ctx.add_message(Message::user("hi"));
        assert_eq!(ctx.history().system_prompt.as_deref(), Some("be helpful"));
        assert_eq!(ctx.history().messages.len(), 1);
    }

    #[test]
    fn should_compact_reflects_trigger_threshold() {
        let mut ctx = manager(10, 5);
        assert!(!ctx.should_compact());
        for i in 0..20 {
            ctx.add_message(Message::user(format!("message number {i} with padding text")));
        }
        assert!(ctx.should_compact());
    }

    #[tokio::test]
    async fn compact_replaces_history_and_records_result() {
        let mut ctx = manager(1, 1);
        for i in 0..10 {
            ctx.add_message(Message::user(format!("msg {i}")));
            ctx.add_message(Message::assistant(format!("reply {i}"), vec![]));
        }
        let before = ctx.token_count();
        let result = ctx.compact().await;
        assert!(result.tokens_after < before);
        assert_eq!(ctx.state().compaction_history.len(), 1);
    }

    #[tokio::test]
    async fn unsatisfiable_compaction_is_recorded_not_raised() {
        // target_tokens of 1 can never be met once even a single preserved
        // message is counted; compact() must still succeed, just flag it.
        let mut ctx = manager(1, 1);
        ctx.add_message(Message::user(
            "a very long preserved message ".repeat(200),
        ));
        let result = ctx.compact().await;
        assert_eq!(result.removed_count, 0);
        assert!(!ctx.state().unsatisfiable.is_empty());
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let mut ctx = manager(1_000_000, 1);
        ctx.add_message(Message::system("sys"));
        ctx.add_message(Message::user("hi"));
        let snap = ctx.snapshot();

        let mut restored = manager(1_000_000, 1);
        restored.restore(&snap).unwrap();
        assert_eq!(restored.history().system_prompt.as_deref(), Some("sys"));
        assert_eq!(restored.history().messages.len(), 1);
    }
}
