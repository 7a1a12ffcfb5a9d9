//! Sliding-window compaction: drop the oldest messages first until the
//! history fits under `target_tokens`, outside the preserved recent-turns
//! window. Grounded on the teacher's original (buggy) sliding-window
//! truncation in `context.rs`; the pairing fix lives in the parent module.

use async_trait::async_trait;

use super::{
    enforce_pairing_within_limit, message_tokens, preserve_from_index, rebuild, token_count,
    CompactionOptions, CompactionResult, CompactionStrategy,
};
use crate::message::MessageHistory;
use crate::token::TokenCounter;

#[derive(Debug, Default)]
pub struct SlidingWindowStrategy;

#[async_trait]
impl CompactionStrategy for SlidingWindowStrategy {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    async fn compact(
        &self,
        history: &MessageHistory,
        counter: &TokenCounter,
        options: &CompactionOptions,
    ) -> CompactionResult {
        let tokens_before = token_count(history, counter);
        let messages = &history.messages;
        let preserve_from = preserve_from_index(messages, options.preserve_recent_turns);

        let mut remove = Vec::new();
        let mut running = tokens_before;
        for i in 0..preserve_from {
            if running <= options.target_tokens {
                break;
            }
            remove.push(i);
            running = running.saturating_sub(message_tokens(&messages[i], counter));
        }
        let remove = enforce_pairing_within_limit(messages, &remove, preserve_from);
        let remove_set = remove.iter().copied().collect();

        let new_history = rebuild(history, &remove_set, options.preserve_system_prompt, None);
        let tokens_after = token_count(&new_history, counter);

        CompactionResult {
            tokens_before,
            tokens_after,
            removed_count: remove.len(),
            strategy: self.name().to_string(),
            history: new_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, ToolCallRequest};
    use serde_json::json;

    fn counter() -> TokenCounter {
        TokenCounter::with_default_encoding()
    }

    #[tokio::test]
    async fn drops_oldest_until_under_target() {
        let mut history = MessageHistory::new();
        for i in 0..20 {
            history.add(Message::user(format!("message number {i} with some padding text")));
            history.add(Message::assistant(format!("reply {i}"), vec![]));
        }
        let counter = counter();
        let before = token_count(&history, &counter);
        let options = CompactionOptions {
            target_tokens: before / 2,
            preserve_recent_turns: 2,
            preserve_system_prompt: true,
        };
        let result = SlidingWindowStrategy.compact(&history, &counter, &options).await;
        assert!(result.tokens_after < result.tokens_before);
        assert!(result.removed_count > 0);
    }

    #[tokio::test]
    async fn never_orphans_a_tool_call_pair() {
        let counter = counter();
        let mut history = MessageHistory::new();
        history.add(Message::user("look something up"));
        history.add(Message::assistant(
            "let me check",
            vec![ToolCallRequest { id: "c1".into(), name: "search".into(), args: json!({}) }],
        ));
        history.add(Message::tool_result("c1", "search", "a very long result ".repeat(50), false));
        history.add(Message::user("thanks"));
        history.add(Message::assistant("sure thing", vec![]));

        let options = CompactionOptions {
            target_tokens: 1,
            preserve_recent_turns: 1,
            preserve_system_prompt: true,
        };
        let result = SlidingWindowStrategy.compact(&history, &counter, &options).await;

        let has_call = result.history.messages.iter().any(|m| m.tool_calls.iter().any(|c| c.id == "c1"));
        let has_result = result.history.messages.iter().any(|m| m.tool_call_id.as_deref() == Some("c1"));
        assert_eq!(has_call, has_result, "tool call and its result must be removed or kept together");
    }
}
