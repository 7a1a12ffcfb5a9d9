//! Pluggable Context Compaction strategies (spec §4.D). Each strategy
//! consumes a `MessageHistory` and returns a smaller one, always honoring two
//! invariants: the most recent `preserve_recent_turns` turns are never
//! touched, and an assistant tool-call is never separated from its matching
//! tool-result message.
//!
//! The teacher's sliding-window compaction (`context.rs` on the original
//! tree) truncated by index without checking for straddling tool-call pairs;
//! `enforce_pairing_within_limit` below is the fix, expanding a candidate
//! removal set to whole pairing groups and then dropping any group that
//! reaches into the preserved window, rather than truncating mid-group.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::message::{Message, MessageHistory, Role};
use crate::token::TokenCounter;

mod hybrid;
mod importance;
mod selective_pruning;
mod sliding_window;
mod summarize;

pub use hybrid::HybridStrategy;
pub use importance::{HeuristicScorer, ImportanceStrategy, Scorer};
pub use selective_pruning::SelectivePruningStrategy;
pub use sliding_window::SlidingWindowStrategy;
pub use summarize::{SummarizeOlderStrategy, Summarizer};

/// Parameters every strategy compacts against.
#[derive(Debug, Clone)]
pub struct CompactionOptions {
    pub target_tokens: u32,
    pub preserve_recent_turns: usize,
    pub preserve_system_prompt: bool,
}

/// Outcome of a single compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub history: MessageHistory,
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub removed_count: usize,
    pub strategy: String,
}

#[async_trait]
pub trait CompactionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compact(
        &self,
        history: &MessageHistory,
        counter: &TokenCounter,
        options: &CompactionOptions,
    ) -> CompactionResult;
}

/// Which strategy is active in `ContextConfig` (spec §6 "Context" surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    SlidingWindow,
    SummarizeOlder,
    SelectivePruning,
    Importance,
    Hybrid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SlidingWindow => "sliding_window",
            StrategyKind::SummarizeOlder => "summarize_older",
            StrategyKind::SelectivePruning => "selective_pruning",
            StrategyKind::Importance => "importance",
            StrategyKind::Hybrid => "hybrid",
        }
    }
}

pub(crate) fn token_count(history: &MessageHistory, counter: &TokenCounter) -> u32 {
    let mut total = counter.count_messages(&history.messages);
    if let Some(system) = &history.system_prompt {
        total += counter.count(system);
    }
    total
}

pub(crate) fn message_tokens(message: &Message, counter: &TokenCounter) -> u32 {
    counter.count_messages(std::slice::from_ref(message))
}

/// Index of the first message belonging to the last `preserve_recent_turns`
/// turns (a turn starts at a `user` message; see `MessageHistory::turns`).
/// `0` if there aren't enough turns to protect anything, `messages.len()` if
/// `preserve_recent_turns` is `0`.
pub(crate) fn preserve_from_index(messages: &[Message], preserve_recent_turns: usize) -> usize {
    if preserve_recent_turns == 0 {
        return messages.len();
    }
    let turn_starts: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| matches!(m.role, Role::User))
        .map(|(i, _)| i)
        .collect();
    if turn_starts.len() <= preserve_recent_turns {
        return 0;
    }
    turn_starts[turn_starts.len() - preserve_recent_turns]
}

/// Groups of indices that must be removed (or kept) together: an assistant
/// message and every tool-result message answering one of its tool calls.
fn pairing_groups(messages: &[Message]) -> Vec<Vec<usize>> {
    let mut call_owner: HashMap<&str, usize> = HashMap::new();
    for (i, m) in messages.iter().enumerate() {
        if matches!(m.role, Role::Assistant) {
            for call in &m.tool_calls {
                call_owner.insert(call.id.as_str(), i);
            }
        }
    }
    let mut groups: Vec<Vec<usize>> = (0..messages.len()).map(|i| vec![i]).collect();
    for (i, m) in messages.iter().enumerate() {
        if matches!(m.role, Role::Tool) {
            if let Some(owner) = m
                .tool_call_id
                .as_deref()
                .and_then(|id| call_owner.get(id).copied())
            {
                groups[owner].push(i);
            }
        }
    }
    groups
}

fn group_index(messages: &[Message]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let groups = pairing_groups(messages);
    let mut owner_of = vec![0usize; messages.len()];
    for (gi, members) in groups.iter().enumerate() {
        for &idx in members {
            owner_of[idx] = gi;
        }
    }
    (groups, owner_of)
}

/// Expands `initial` to a fixed point under the pairing invariant: whenever
/// an index is selected, every other member of its pairing group is pulled
/// in too.
pub(crate) fn enforce_pairing(messages: &[Message], initial: &[usize]) -> Vec<usize> {
    let (groups, owner_of) = group_index(messages);
    let mut selected: HashSet<usize> = initial.iter().copied().collect();
    loop {
        let mut additions = Vec::new();
        for &idx in &selected {
            for &member in &groups[owner_of[idx]] {
                if !selected.contains(&member) {
                    additions.push(member);
                }
            }
        }
        if additions.is_empty() {
            break;
        }
        selected.extend(additions);
    }
    let mut out: Vec<usize> = selected.into_iter().collect();
    out.sort_unstable();
    out
}

/// Like `enforce_pairing`, but additionally guarantees no selected index
/// falls at or past `preserve_from`: rather than truncating a group at the
/// boundary (which would orphan the half that stays), it drops the whole
/// group back out of the removal set.
pub(crate) fn enforce_pairing_within_limit(
    messages: &[Message],
    initial: &[usize],
    preserve_from: usize,
) -> Vec<usize> {
    let (groups, owner_of) = group_index(messages);
    let mut selected: HashSet<usize> = enforce_pairing(messages, initial).into_iter().collect();
    loop {
        let violating: HashSet<usize> = selected
            .iter()
            .filter(|&&idx| idx >= preserve_from)
            .map(|&idx| owner_of[idx])
            .collect();
        if violating.is_empty() {
            break;
        }
        let before = selected.len();
        selected.retain(|idx| !violating.contains(&owner_of[*idx]));
        if selected.len() == before {
            break;
        }
    }
    let mut out: Vec<usize> = selected.into_iter().collect();
    out.sort_unstable();
    out
}

fn rebuild(
    history: &MessageHistory,
    remove: &HashSet<usize>,
    preserve_system_prompt: bool,
    leading: Option<Message>,
) -> MessageHistory {
    let mut messages = Vec::with_capacity(history.messages.len() - remove.len() + 1);
    if let Some(note) = leading {
        messages.push(note);
    }
    for (i, m) in history.messages.iter().enumerate() {
        if !remove.contains(&i) {
            messages.push(m.clone());
        }
    }
    MessageHistory {
        system_prompt: if preserve_system_prompt {
            history.system_prompt.clone()
        } else {
            None
        },
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRequest;
    use serde_json::json;

    fn history_with_tool_pair() -> MessageHistory {
        let mut h = MessageHistory::new();
        h.add(Message::user("hi"));
        h.add(Message::assistant(
            "checking",
            vec![ToolCallRequest {
                id: "c1".into(),
                name: "search".into(),
                args: json!({}),
            }],
        ));
        h.add(Message::tool_result("c1", "search", "result", false));
        h.add(Message::user("thanks"));
        h.add(Message::assistant("np", vec![]));
        h
    }

    #[test]
    fn enforce_pairing_pulls_in_tool_result() {
        let h = history_with_tool_pair();
        let expanded = enforce_pairing(&h.messages, &[1]);
        assert_eq!(expanded, vec![1, 2]);
    }

    #[test]
    fn enforce_pairing_within_limit_drops_straddling_group() {
        let h = history_with_tool_pair();
        // preserve_from = 2 means index 2 (the tool result) is protected,
        // so selecting index 1 (the assistant call) must NOT orphan it.
        let result = enforce_pairing_within_limit(&h.messages, &[1], 2);
        assert!(result.is_empty(), "straddling pair must be fully reverted: {result:?}");
    }

    #[test]
    fn preserve_from_index_respects_turn_count() {
        let h = history_with_tool_pair();
        assert_eq!(preserve_from_index(&h.messages, 1), 3);
        assert_eq!(preserve_from_index(&h.messages, 10), 0);
        assert_eq!(preserve_from_index(&h.messages, 0), h.messages.len());
    }
}
