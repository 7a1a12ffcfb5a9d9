//! Selective pruning: identifies completed tool-call/result pairs (an
//! assistant tool-call whose id appears in a later tool message) and replaces
//! the oldest ones with a single synthetic note, leaving in-flight
//! (unpaired) tool calls untouched (spec §4.D).

use std::collections::HashMap;

use async_trait::async_trait;

use super::{
    enforce_pairing_within_limit, message_tokens, preserve_from_index, rebuild, token_count,
    CompactionOptions, CompactionResult, CompactionStrategy,
};
use crate::message::{Message, MessageHistory, Role};
use crate::token::TokenCounter;

#[derive(Debug, Default)]
pub struct SelectivePruningStrategy;

#[async_trait]
impl CompactionStrategy for SelectivePruningStrategy {
    fn name(&self) -> &'static str {
        "selective_pruning"
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

        let mut call_owner: HashMap<&str, usize> = HashMap::new();
        for (i, m) in messages.iter().enumerate().take(preserve_from) {
            if matches!(m.role, Role::Assistant) {
                for call in &m.tool_calls {
                    call_owner.insert(call.id.as_str(), i);
                }
            }
        }

        // Completed pairs only, oldest (by assistant index) first.
        let mut pairs: Vec<(usize, usize)> = messages
            .iter()
            .enumerate()
            .take(preserve_from)
            .filter(|(_, m)| matches!(m.role, Role::Tool))
            .filter_map(|(i, m)| {
                m.tool_call_id
                    .as_deref()
                    .and_then(|id| call_owner.get(id).copied())
                    .map(|owner| (owner, i))
            })
            .collect();
        pairs.sort_by_key(|&(owner, _)| owner);

        let mut remove = Vec::new();
        let mut running = tokens_before;
        for (assistant_idx, tool_idx) in pairs {
            if running <= options.target_tokens {
                break;
            }
            let pair_tokens = message_tokens(&messages[assistant_idx], counter)
                + message_tokens(&messages[tool_idx], counter);
            remove.push(assistant_idx);
            remove.push(tool_idx);
            running = running.saturating_sub(pair_tokens);
        }
        let remove = enforce_pairing_within_limit(messages, &remove, preserve_from);

        if remove.is_empty() {
            return CompactionResult {
                tokens_before,
                tokens_after: tokens_before,
                removed_count: 0,
                strategy: self.name().to_string(),
                history: history.clone(),
            };
        }

        let names: Vec<String> = remove
            .iter()
            .filter_map(|&i| match messages[i].role {
                Role::Tool => messages[i].name.clone(),
                _ => None,
            })
            .collect();
        let remove_set = remove.iter().copied().collect();
        let note = Message::system(format!("[Tool calls executed: {}]", names.join(", ")));
        let new_history = rebuild(history, &remove_set, options.preserve_system_prompt, Some(note));
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
