//! Hybrid compaction: run a configured sequence of strategies in order,
//! stopping as soon as the target is met. The result's `strategy` field lists
//! every stage that actually removed something, e.g.
//! `hybrid(selective_pruning+sliding_window)`.

use async_trait::async_trait;

use super::{token_count, CompactionOptions, CompactionResult, CompactionStrategy};
use crate::message::MessageHistory;
use crate::token::TokenCounter;

pub struct HybridStrategy {
    stages: Vec<Box<dyn CompactionStrategy>>,
}

impl HybridStrategy {
    pub fn new(stages: Vec<Box<dyn CompactionStrategy>>) -> Self {
        Self { stages }
    }
}

#[async_trait]
impl CompactionStrategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn compact(
        &self,
        history: &MessageHistory,
        counter: &TokenCounter,
        options: &CompactionOptions,
    ) -> CompactionResult {
        let tokens_before = token_count(history, counter);
        let mut current = history.clone();
        let mut removed_total = 0usize;
        let mut ran: Vec<&'static str> = Vec::new();

        for stage in &self.stages {
            let current_tokens = token_count(&current, counter);
            if current_tokens <= options.target_tokens {
                break;
            }
            let result = stage.compact(&current, counter, options).await;
            if result.removed_count > 0 {
                ran.push(stage.name());
            }
            removed_total += result.removed_count;
            current = result.history;
        }

        let tokens_after = token_count(&current, counter);

        CompactionResult {
            tokens_before,
            tokens_after,
            removed_count: removed_total,
            strategy: format!("hybrid({})", ran.join("+")),
            history: current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::{SelectivePruningStrategy, SlidingWindowStrategy};
    use crate::message::{Message, ToolCallRequest};
    use serde_json::json;

    fn counter() -> TokenCounter {
        TokenCounter::with_default_encoding()
    }

    fn sample_history() -> MessageHistory {
        let mut h = MessageHistory::new();
        h.add(Message::user("start"));
        for i in 0..6 {
            h.add(Message::assistant(
                "checking",
                vec![ToolCallRequest { id: format!("c{i}"), name: "fetch".into(), args: json!({}) }],
            ));
            h.add(Message::tool_result(format!("c{i}"), "fetch", "x".repeat(200), false));
        }
        h.add(Message::user("and then?"));
        h.add(Message::assistant("done", vec![]));
        h
    }

    #[tokio::test]
    async fn stops_as_soon_as_target_met() {
        let counter = counter();
        let history = sample_history();
        let before = token_count(&history, &counter);
        let strategy = HybridStrategy::new(vec![
            Box::new(SelectivePruningStrategy),
            Box::new(SlidingWindowStrategy),
        ]);
        let options = CompactionOptions {
            target_tokens: before - 100,
            preserve_recent_turns: 1,
            preserve_system_prompt: true,
        };
        let result = strategy.compact(&history, &counter, &options).await;
        assert!(result.tokens_after <= before);
        assert!(result.strategy.starts_with("hybrid("));
    }

    #[tokio::test]
    async fn no_op_label_has_no_stages() {
        let counter = counter();
        let history = sample_history();
        let before = token_count(&history, &counter);
        let strategy = HybridStrategy::new(vec![Box::new(SlidingWindowStrategy)]);
        let options = CompactionOptions {
            target_tokens: before + 1000,
            preserve_recent_turns: 1,
            preserve_system_prompt: true,
        };
        let result = strategy.compact(&history, &counter, &options).await;
        assert_eq!(result.removed_count, 0);
        assert_eq!(result.strategy, "hybrid()");
    }
}
