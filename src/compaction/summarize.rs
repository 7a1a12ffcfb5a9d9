//! Summarize-older compaction: replace the oldest eligible messages with a
//! single synthetic note produced by a pluggable `Summarizer`, falling back
//! to a deterministic placeholder if summarization fails (spec §4.D — a
//! compaction pass must never itself abort the run).

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    enforce_pairing_within_limit, preserve_from_index, rebuild, token_count, CompactionOptions,
    CompactionResult, CompactionStrategy,
};
use crate::error::InferenceError;
use crate::message::{Message, MessageHistory};
use crate::token::TokenCounter;

/// Produces a prose summary of a run of older messages. The model-backed
/// implementation lives alongside `ModelBackend`; tests and offline use
/// supply a deterministic stand-in.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, InferenceError>;
}

fn fallback_summary(messages: &[Message]) -> String {
    format!(
        "{} earlier message(s) omitted (summarization unavailable).",
        messages.len()
    )
}

pub struct SummarizeOlderStrategy {
    summarizer: Arc<dyn Summarizer>,
}

impl SummarizeOlderStrategy {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl CompactionStrategy for SummarizeOlderStrategy {
    fn name(&self) -> &'static str {
        "summarize_older"
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

        let candidate: Vec<usize> = (0..preserve_from).collect();
        let to_remove = enforce_pairing_within_limit(messages, &candidate, preserve_from);

        if to_remove.is_empty() {
            return CompactionResult {
                tokens_before,
                tokens_after: tokens_before,
                removed_count: 0,
                strategy: self.name().to_string(),
                history: history.clone(),
            };
        }

        let summarized: Vec<Message> = to_remove.iter().map(|&i| messages[i].clone()).collect();
        let summary_text = match self.summarizer.summarize(&summarized).await {
            Ok(text) => text,
            Err(_) => fallback_summary(&summarized),
        };

        let remove_set = to_remove.iter().copied().collect();
        let note = Message::system(format!("[Earlier conversation summarized]\n{summary_text}"));
        let new_history = rebuild(history, &remove_set, options.preserve_system_prompt, Some(note));
        let tokens_after = token_count(&new_history, counter);

        CompactionResult {
            tokens_before,
            tokens_after,
            removed_count: to_remove.len(),
            strategy: self.name().to_string(),
            history: new_history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<String, InferenceError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _messages: &[Message]) -> Result<String, InferenceError> {
            Err(InferenceError::Request("boom".into()))
        }
    }

    fn sample_history() -> MessageHistory {
        let mut h = MessageHistory::new();
        for i in 0..10 {
            h.add(Message::user(format!("q{i}")));
            h.add(Message::assistant(format!("a{i}"), vec![]));
        }
        h
    }

    #[tokio::test]
    async fn replaces_old_turns_with_single_summary_note() {
        let counter = TokenCounter::with_default_encoding();
        let strategy = SummarizeOlderStrategy::new(Arc::new(StubSummarizer("the gist")));
        let options = CompactionOptions { target_tokens: 1, preserve_recent_turns: 2, preserve_system_prompt: true };
        let result = strategy.compact(&sample_history(), &counter, &options).await;
        assert!(result.history.messages[0].content.contains("the gist"));
        assert!(result.removed_count > 0);
        assert!(result.tokens_after < result.tokens_before);
    }

    #[tokio::test]
    async fn falls_back_when_summarizer_fails() {
        let counter = TokenCounter::with_default_encoding();
        let strategy = SummarizeOlderStrategy::new(Arc::new(FailingSummarizer));
        let options = CompactionOptions { target_tokens: 1, preserve_recent_turns: 2, preserve_system_prompt: true };
        let result = strategy.compact(&sample_history(), &counter, &options).await;
        assert!(result.history.messages[0].content.contains("omitted"));
    }
}
