//! Deterministic token counting (spec §4.A).
//!
//! Backed by `tiktoken-rs`'s `cl100k_base` byte-pair encoding — the core
//! treats the encoding as an opaque, stable oracle, exactly as spec.md
//! demands. The per-message/trailing overhead constants and the model→
//! encoding mapping mirror `original_source/tokens/counter.py` and
//! `tokens/config.py`: 4 tokens of per-message overhead, 3 trailing, 5%
//! default safety margin.

use std::collections::HashMap;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::ConfigurationError;
use crate::message::{Message, Role};

/// Tokenizer configuration (spec §6 "Tokenizer" surface).
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    pub encoding: String,
    pub model_mapping: HashMap<String, String>,
    pub safety_margin: f64,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        let mut model_mapping = HashMap::new();
        model_mapping.insert("llama".to_string(), "cl100k_base".to_string());
        model_mapping.insert("mistral".to_string(), "cl100k_base".to_string());
        model_mapping.insert("gpt-4".to_string(), "cl100k_base".to_string());
        model_mapping.insert("gpt-3.5".to_string(), "cl100k_base".to_string());

        Self {
            encoding: "cl100k_base".to_string(),
            model_mapping,
            safety_margin: 0.05,
        }
    }
}

/// Per-message token overhead (role + separators), per spec §4.A.
const PER_MESSAGE_OVERHEAD: u32 = 4;
/// Trailing overhead added once after all messages are counted.
const TRAILING_OVERHEAD: u32 = 3;
/// Overhead per tool call (name + args separators).
const PER_TOOL_CALL_OVERHEAD: u32 = 10;

/// Counts tokens for strings and structured messages. Cheap to clone — the
/// underlying encoding table is an `Arc` shared process-wide, cached the
/// first time a given encoding name is requested.
#[derive(Clone)]
pub struct TokenCounter {
    encoding: Arc<CoreBPE>,
    config: TokenizerConfig,
}

impl TokenCounter {
    /// Build a counter for the given config's encoding.
    pub fn new(config: TokenizerConfig) -> Result<Self, ConfigurationError> {
        let bpe = match config.encoding.as_str() {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            other => {
                return Err(ConfigurationError {
                    config_key: "tokenizer.encoding".into(),
                    expected: "one of cl100k_base, o200k_base, p50k_base, r50k_base".into(),
                    actual: other.into(),
                })
            }
        }
        .map_err(|e| ConfigurationError {
            config_key: "tokenizer.encoding".into(),
            expected: "a loadable tiktoken encoding".into(),
            actual: e.to_string(),
        })?;

        Ok(Self {
            encoding: Arc::new(bpe),
            config,
        })
    }

    pub fn with_default_encoding() -> Self {
        Self::new(TokenizerConfig::default()).expect("cl100k_base always loads")
    }

    /// Count tokens in free text.
    pub fn count(&self, text: &str) -> u32 {
        self.encoding.encode_with_special_tokens(text).len() as u32
    }

    /// Count tokens for a single message, not including per-message overhead.
    fn count_message_body(&self, message: &Message) -> u32 {
        let mut total = self.count(&message.content);
        total += self.count(role_str(message.role));
        for call in &message.tool_calls {
            total += self.count(&call.name);
            total += self.count(&call.args.to_string());
            total += PER_TOOL_CALL_OVERHEAD;
        }
        total
    }

    /// Sum of per-message content + role + tool-call tokens, plus the fixed
    /// per-message and trailing overheads from spec §4.A.
    pub fn count_messages(&self, messages: &[Message]) -> u32 {
        let mut total: u32 = 0;
        for message in messages {
            total += PER_MESSAGE_OVERHEAD;
            total += self.count_message_body(message);
        }
        total += TRAILING_OVERHEAD;
        total
    }

    /// Token count plus a configurable safety margin.
    pub fn count_with_margin(&self, text: &str) -> u32 {
        let base = self.count(text);
        let margin = (base as f64 * self.config.safety_margin).round() as u32;
        base + margin
    }

    /// Whether `text` fits within `max_tokens` once the safety margin is applied.
    pub fn fits_context(&self, text: &str, max_tokens: u32) -> bool {
        self.count_with_margin(text) <= max_tokens
    }

    /// Resolve the encoding name to use for a given model, via the
    /// configured prefix mapping, falling back to the counter's own encoding.
    pub fn encoding_for_model(&self, model: &str) -> String {
        let model_lower = model.to_lowercase();
        for (prefix, encoding) in &self.config.model_mapping {
            if model_lower.contains(prefix.as_str()) {
                return encoding.clone();
            }
        }
        self.config.encoding.clone()
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRequest;
    use serde_json::json;

    #[test]
    fn empty_string_counts_zero() {
        let counter = TokenCounter::with_default_encoding();
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn concatenation_is_at_least_as_large_as_either_part() {
        let counter = TokenCounter::with_default_encoding();
        let a = "the quick brown fox";
        let b = "jumps over the lazy dog";
        let combined = counter.count(&format!("{a} {b}"));
        assert!(combined >= counter.count(a));
        assert!(combined >= counter.count(b));
    }

    #[test]
    fn count_messages_is_deterministic() {
        let counter = TokenCounter::with_default_encoding();
        let messages = vec![
            Message::user("hello there"),
            Message::assistant(
                "sure",
                vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "search".into(),
                    args: json!({"q": "rust"}),
                }],
            ),
        ];
        let first = counter.count_messages(&messages);
        let second = counter.count_messages(&messages);
        assert_eq!(first, second);
        assert!(first > 0);
    }

    #[test]
    fn fits_context_respects_margin() {
        let counter = TokenCounter::with_default_encoding();
        let text = "a".repeat(40);
        let exact = counter.count(text.as_str());
        assert!(!counter.fits_context(&text, exact));
        let margined = counter.count_with_margin(&text);
        assert!(counter.fits_context(&text, margined));
    }

    #[test]
    fn encoding_for_model_uses_mapping() {
        let counter = TokenCounter::with_default_encoding();
        assert_eq!(counter.encoding_for_model("gpt-4-turbo"), "cl100k_base");
        assert_eq!(counter.encoding_for_model("claude-3-opus"), "cl100k_base");
    }
}
