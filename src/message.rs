//! Core message data model (role, content, tool-call linkage) shared by the
//! Context Manager, compaction strategies, and the Agent Loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four message roles the runtime understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool-call request as carried by an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A single message in the live history.
///
/// `tool_calls` is only ever non-empty on `Role::Assistant` messages.
/// `tool_call_id`/`name` are only ever set on `Role::Tool` messages, and
/// `tool_call_id` must match the `id` of a `ToolCallRequest` on some earlier
/// assistant message within the live history (the pairing invariant —
/// compaction strategies are responsible for preserving it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            name: None,
            is_error: None,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            is_error: Some(is_error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

/// A contiguous slice of messages: one user message plus everything that
/// follows up to (but excluding) the next user message. A leading run with no
/// user message is its own turn.
pub type Turn<'a> = &'a [Message];

/// Ordered message log plus a separate system-prompt slot.
///
/// Tool-call/result pairing is *not* enforced here; that is the compaction
/// layer's obligation (spec §4.C).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageHistory {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_tool_result(&mut self, call_id: &str, name: &str, content: &str, is_error: bool) {
        self.messages
            .push(Message::tool_result(call_id, name, content, is_error));
    }

    pub fn recent(&self, n: usize) -> &[Message] {
        let len = self.messages.len();
        &self.messages[len.saturating_sub(n)..]
    }

    /// Groups messages such that each group begins with a `user` message; a
    /// leading prefix with no user message is its own group.
    pub fn turns(&self) -> Vec<Turn<'_>> {
        let mut turns = Vec::new();
        let mut start = 0;
        for (i, msg) in self.messages.iter().enumerate() {
            if matches!(msg.role, Role::User) && i != start {
                turns.push(&self.messages[start..i]);
                start = i;
            }
        }
        if start < self.messages.len() {
            turns.push(&self.messages[start..]);
        }
        turns
    }

    pub fn recent_turns(&self, n: usize) -> Vec<Turn<'_>> {
        let turns = self.turns();
        let len = turns.len();
        turns[len.saturating_sub(n)..].to_vec()
    }

    pub fn remove_oldest(&mut self, n: usize) {
        let n = n.min(self.messages.len());
        self.messages.drain(0..n);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_group_by_user_message() {
        let mut hist = MessageHistory::new();
        hist.add(Message::user("hi"));
        hist.add(Message::assistant("hello", vec![]));
        hist.add(Message::user("bye"));
        hist.add(Message::assistant("ok", vec![]));

        let turns = hist.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].len(), 2);
        assert_eq!(turns[1].len(), 2);

        let flat: Vec<&Message> = turns.into_iter().flatten().collect();
        assert_eq!(flat.len(), hist.messages.len());
    }

    #[test]
    fn leading_prefix_without_user_is_own_turn() {
        let mut hist = MessageHistory::new();
        hist.add(Message::assistant("greeting", vec![]));
        hist.add(Message::user("hi"));

        let turns = hist.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].len(), 1);
    }

    #[test]
    fn recent_after_add() {
        let mut hist = MessageHistory::new();
        hist.add(Message::user("one"));
        assert_eq!(hist.len(), 1);
        assert_eq!(hist.recent(1)[0].content, "one");
    }
}
