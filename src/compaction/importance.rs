//! Importance-scored eviction: assign every message outside the preserve
//! window a score in `[0, 1]` and drop the lowest-scoring ones first until
//! the target is met. Spec §4.D gives the heuristic exactly; an LLM-backed
//! `Scorer` is optional and best-effort — per spec §9's open question, a
//! scoring failure or a malformed free-form response falls back to the
//! heuristic rather than failing compaction.

use async_trait::async_trait;

use super::{
    enforce_pairing_within_limit, preserve_from_index, rebuild, token_count, CompactionOptions,
    CompactionResult, CompactionStrategy,
};
use crate::message::{Message, MessageHistory, Role};
use crate::token::TokenCounter;

/// Assigns an importance score to a message in the context of its position.
/// `position`/`total` are 0-indexed and message-count respectively.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, message: &Message, position: usize, total: usize) -> Option<f64>;
}

/// Deterministic heuristic: `0.5*recency + 0.4*role_weight + length_bonus`.
#[derive(Debug, Default)]
pub struct HeuristicScorer;

fn role_weight(message: &Message) -> f64 {
    match message.role {
        Role::System => 1.0,
        Role::User => 0.7,
        Role::Assistant if !message.tool_calls.is_empty() => 0.5,
        Role::Assistant => 0.6,
        Role::Tool => 0.3,
    }
}

fn length_bonus(message: &Message) -> f64 {
    (message.content.len() as f64 / 500.0).min(0.2)
}

pub fn heuristic_score(message: &Message, position: usize, total: usize) -> f64 {
    let recency = if total <= 1 {
        1.0
    } else {
        position as f64 / (total - 1) as f64
    };
    0.5 * recency + 0.4 * role_weight(message) + length_bonus(message)
}

#[async_trait]
impl Scorer for HeuristicScorer {
    async fn score(&self, message: &Message, position: usize, total: usize) -> Option<f64> {
        Some(heuristic_score(message, position, total))
    }
}

pub struct ImportanceStrategy {
    scorer: std::sync::Arc<dyn Scorer>,
}

impl Default for ImportanceStrategy {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(HeuristicScorer))
    }
}

impl ImportanceStrategy {
    pub fn new(scorer: std::sync::Arc<dyn Scorer>) -> Self {
        Self { scorer }
    }

    async fn score_all(&self, messages: &[Message]) -> Vec<f64> {
        let total = messages.len();
        let mut scores = Vec::with_capacity(total);
        for (i, m) in messages.iter().enumerate() {
            let score = match self.scorer.score(m, i, total).await {
                Some(s) => s,
                None => heuristic_score(m, i, total),
            };
            scores.push(score);
        }
        scores
    }
}

#[async_trait]
impl CompactionStrategy for ImportanceStrategy {
    fn name(&self) -> &'static str {
        "importance"
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

        let scores = self.score_all(messages).await;

        // Ascending score, older first on ties. `position` breaks ties in
        // favor of removing the lower index (older message) first.
        let mut ranked: Vec<usize> = (0..preserve_from).collect();
        ranked.sort_by(|&a, &b| {
            scores[a]
                .partial_cmp(&scores[b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut remove = Vec::new();
        let mut running = tokens_before;
        for idx in ranked {
            if running <= options.target_tokens {
                break;
            }
            remove.push(idx);
            running = running.saturating_sub(super::message_tokens(&messages[idx], counter));
        }
        let remove = enforce_pairing_within_limit(messages, &remove, preserve_from);
        let remove_set: std::collections::HashSet<usize> = remove.iter().copied().collect();

        // Reassembly (`rebuild`) walks the original index order, so relative
        // ordering of the surviving messages is preserved automatically.
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
