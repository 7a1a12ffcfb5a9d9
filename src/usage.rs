//! Usage Tracker (spec §4.B): append-only usage log + running aggregate +
//! cost estimation. Rate table and lookup order are grounded on
//! `original_source/tokens/cost.py`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single immutable usage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub model: Option<String>,
    pub tool_name: Option<String>,
}

/// Running aggregate across all recorded usage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub request_count: u64,
}

impl UsageAggregate {
    fn accumulate(&mut self, record: &UsageRecord) {
        self.prompt_tokens += record.prompt_tokens as u64;
        self.completion_tokens += record.completion_tokens as u64;
        self.total_tokens += record.total_tokens as u64;
        self.request_count += 1;
    }
}

/// Key used for calls with no associated tool in `breakdown_by_tool()`.
pub const AGENT_BUCKET: &str = "_agent";

/// Default cost rates, USD per 1000 tokens. Mirrors
/// `original_source/tokens/cost.py::DEFAULT_COST_RATES` exactly.
fn default_cost_rates() -> HashMap<String, f64> {
    [
        ("gpt-4", 0.03),
        ("gpt-4-turbo", 0.01),
        ("gpt-3.5-turbo", 0.002),
        ("claude-3-opus", 0.015),
        ("claude-3-sonnet", 0.003),
        ("claude-3-haiku", 0.00025),
        ("llama", 0.0),
        ("mistral", 0.0),
        ("ollama", 0.0),
        ("default", 0.001),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostBreakdown {
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
}

/// Looks up USD/1000-token rates: exact match, then case-insensitive
/// substring match against any configured key, then the `default` entry.
pub struct CostEstimator {
    rates: HashMap<String, f64>,
}

impl CostEstimator {
    pub fn new() -> Self {
        Self {
            rates: default_cost_rates(),
        }
    }

    pub fn with_custom_rates(mut self, custom: HashMap<String, f64>) -> Self {
        self.rates.extend(custom);
        self
    }

    pub fn set_rate(&mut self, model: impl Into<String>, rate: f64) {
        self.rates.insert(model.into(), rate);
    }

    pub fn get_rate(&self, model: &str) -> f64 {
        if let Some(rate) = self.rates.get(model) {
            return *rate;
        }
        let model_lower = model.to_lowercase();
        for (key, rate) in &self.rates {
            if model_lower.contains(key.to_lowercase().as_str()) {
                return *rate;
            }
        }
        *self.rates.get("default").unwrap_or(&0.0)
    }

    pub fn estimate(&self, prompt_tokens: u64, completion_tokens: u64, model: &str) -> CostBreakdown {
        let rate = self.get_rate(model);
        let prompt_cost = (prompt_tokens as f64 / 1000.0) * rate;
        let completion_cost = (completion_tokens as f64 / 1000.0) * rate;
        CostBreakdown {
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
        }
    }
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-writer append-only usage log with running aggregate and
/// per-tool breakdown. Reads return defensive copies.
pub struct UsageTracker {
    history: Vec<UsageRecord>,
    aggregate: UsageAggregate,
    by_tool: HashMap<String, UsageAggregate>,
    cost_estimator: CostEstimator,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            aggregate: UsageAggregate::default(),
            by_tool: HashMap::new(),
            cost_estimator: CostEstimator::new(),
        }
    }

    pub fn record(
        &mut self,
        prompt_tokens: u32,
        completion_tokens: u32,
        model: Option<String>,
        tool_name: Option<String>,
    ) {
        let record = UsageRecord {
            timestamp: Utc::now(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            model,
            tool_name: tool_name.clone(),
        };

        self.aggregate.accumulate(&record);
        let bucket = tool_name.unwrap_or_else(|| AGENT_BUCKET.to_string());
        self.by_tool.entry(bucket).or_default().accumulate(&record);
        self.history.push(record);
    }

    pub fn total(&self) -> UsageAggregate {
        self.aggregate
    }

    pub fn history(&self) -> Vec<UsageRecord> {
        self.history.clone()
    }

    pub fn breakdown_by_tool(&self) -> HashMap<String, UsageAggregate> {
        self.by_tool.clone()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.aggregate = UsageAggregate::default();
        self.by_tool.clear();
    }

    pub fn estimate_cost(&self, model: Option<&str>) -> CostBreakdown {
        self.cost_estimator.estimate(
            self.aggregate.prompt_tokens,
            self.aggregate.completion_tokens,
            model.unwrap_or("default"),
        )
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_aggregate_and_history() {
        let mut tracker = UsageTracker::new();
        tracker.record(10, 5, Some("claude-3-sonnet".into()), None);
        tracker.record(20, 8, Some("claude-3-sonnet".into()), Some("search".into()));

        let total = tracker.total();
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.completion_tokens, 13);
        assert_eq!(total.request_count, 2);
        assert_eq!(tracker.history().len(), 2);
    }

    #[test]
    fn breakdown_buckets_untooled_calls_under_agent() {
        let mut tracker = UsageTracker::new();
        tracker.record(10, 5, None, None);
        tracker.record(7, 3, None, Some("search".into()));

        let breakdown = tracker.breakdown_by_tool();
        assert!(breakdown.contains_key(AGENT_BUCKET));
        assert!(breakdown.contains_key("search"));
        assert_eq!(breakdown[AGENT_BUCKET].total_tokens, 15);
        assert_eq!(breakdown["search"].total_tokens, 10);
    }

    #[test]
    fn cost_rate_exact_then_substring_then_default() {
        let estimator = CostEstimator::new();
        assert_eq!(estimator.get_rate("claude-3-sonnet"), 0.003);
        assert_eq!(estimator.get_rate("claude-3-sonnet-20250514"), 0.003);
        assert_eq!(estimator.get_rate("some-unknown-model"), 0.001);
    }

    #[test]
    fn sum_of_records_equals_aggregate() {
        let mut tracker = UsageTracker::new();
        for i in 1..=5u32 {
            tracker.record(i * 10, i, None, None);
        }
        let expected_prompt: u64 = (1..=5u64).map(|i| i * 10).sum();
        let expected_completion: u64 = (1..=5u64).sum();
        assert_eq!(tracker.total().prompt_tokens, expected_prompt);
        assert_eq!(tracker.total().completion_tokens, expected_completion);
    }
}
