//! Retry aggressiveness levels and error classification (spec §4.H). Ported
//! from `config/retry.py`'s `ErrorRecoveryConfig` level tables.

use crate::error::{AgentError, InferenceError};

/// Aggressiveness level 1-3, selecting `(tool_retries, model_retries,
/// backoff_multiplier)` from the fixed table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLevel {
    Conservative = 1,
    Balanced = 2,
    Aggressive = 3,
}

impl RetryLevel {
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Conservative),
            2 => Some(Self::Balanced),
            3 => Some(Self::Aggressive),
            _ => None,
        }
    }
}

/// Resolved retry parameters for a given level, with optional per-field
/// overrides (spec §6 "Retry" configuration surface).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub tool_retries: u32,
    pub model_retries: u32,
    pub backoff_multiplier: f64,
    pub initial_backoff_seconds: f64,
    pub max_backoff_seconds: f64,
}

impl RetryPolicy {
    pub fn for_level(level: RetryLevel) -> Self {
        let (tool_retries, model_retries, backoff_multiplier) = match level {
            RetryLevel::Conservative => (1, 2, 2.0),
            RetryLevel::Balanced => (2, 3, 1.5),
            RetryLevel::Aggressive => (3, 5, 1.2),
        };
        Self {
            tool_retries,
            model_retries,
            backoff_multiplier,
            initial_backoff_seconds: 1.0,
            max_backoff_seconds: 60.0,
        }
    }

    pub fn with_tool_retries(mut self, n: u32) -> Self {
        self.tool_retries = n;
        self
    }

    pub fn with_model_retries(mut self, n: u32) -> Self {
        self.model_retries = n;
        self
    }

    /// Exponential backoff for the given attempt (0-indexed), capped at
    /// `max_backoff_seconds`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> f64 {
        let raw = self.initial_backoff_seconds * self.backoff_multiplier.powi(attempt as i32);
        raw.min(self.max_backoff_seconds)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_level(RetryLevel::Balanced)
    }
}

/// Spec §4.H / §7's four error categories, as they bear on retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal, not retryable (authentication).
    Fatal,
    /// Retryable, optionally with a server-suggested delay (rate limit).
    RetryableWithDelay,
    /// Retryable with exponential backoff (transport / 5xx).
    RetryableBackoff,
    /// Retryable once after compaction, fatal on a second occurrence.
    ContextOverflow,
    /// Circuit breaker rejected the call outright; not a model failure.
    CircuitOpen,
}

/// Phrases providers use in a 400-status body to report that the prompt
/// no longer fits the model's context window.
const CONTEXT_OVERFLOW_MARKERS: [&str; 4] = [
    "context_length_exceeded",
    "context length exceeded",
    "maximum context length",
    "context window",
];

fn looks_like_context_overflow(body: &str) -> bool {
    let lower = body.to_lowercase();
    CONTEXT_OVERFLOW_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classifies an `InferenceError` for the retry loop.
pub fn classify(error: &InferenceError) -> ErrorClass {
    match error {
        InferenceError::Authentication(_) => ErrorClass::Fatal,
        InferenceError::RateLimit(_) => ErrorClass::RetryableWithDelay,
        InferenceError::CircuitOpen(_) => ErrorClass::CircuitOpen,
        InferenceError::Backend(e) if looks_like_context_overflow(&e.message) => ErrorClass::ContextOverflow,
        InferenceError::Backend(e) if e.retryable => ErrorClass::RetryableBackoff,
        InferenceError::Backend(_) => ErrorClass::Fatal,
        InferenceError::ApiError { status: 400, body } if looks_like_context_overflow(body) => {
            ErrorClass::ContextOverflow
        }
        InferenceError::ApiError { status, .. } if *status >= 500 => ErrorClass::RetryableBackoff,
        InferenceError::ApiError { .. } => ErrorClass::Fatal,
        InferenceError::Request(_) => ErrorClass::RetryableBackoff,
        InferenceError::Parse(_) => ErrorClass::Fatal,
    }
}

/// Whether an `AgentError` should be treated as a context-overflow condition
/// eligible for the "compact once, then fatal" path (spec §7).
pub fn is_context_overflow(error: &AgentError) -> bool {
    matches!(error, AgentError::ContextOverflow(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthenticationError, ModelBackendError, RateLimitError};

    #[test]
    fn level_table_matches_spec() {
        let l1 = RetryPolicy::for_level(RetryLevel::Conservative);
        assert_eq!((l1.tool_retries, l1.model_retries), (1, 2));
        assert_eq!(l1.backoff_multiplier, 2.0);

        let l2 = RetryPolicy::for_level(RetryLevel::Balanced);
        assert_eq!((l2.tool_retries, l2.model_retries), (2, 3));
        assert_eq!(l2.backoff_multiplier, 1.5);

        let l3 = RetryPolicy::for_level(RetryLevel::Aggressive);
        assert_eq!((l3.tool_retries, l3.model_retries), (3, 5));
        assert_eq!(l3.backoff_multiplier, 1.2);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::for_level(RetryLevel::Conservative)
            .with_tool_retries(1);
        assert_eq!(policy.backoff_for_attempt(0), 1.0);
        assert_eq!(policy.backoff_for_attempt(1), 2.0);
        let capped = RetryPolicy { max_backoff_seconds: 3.0, ..policy };
        assert_eq!(capped.backoff_for_attempt(5), 3.0);
    }

    #[test]
    fn classification_matches_spec_categories() {
        assert_eq!(
            classify(&InferenceError::Authentication(AuthenticationError("x".into()))),
            ErrorClass::Fatal
        );
        assert_eq!(
            classify(&InferenceError::RateLimit(RateLimitError { retry_after: Some(1.0) })),
            ErrorClass::RetryableWithDelay
        );
        assert_eq!(
            classify(&InferenceError::Backend(ModelBackendError {
                status_code: 503,
                message: "down".into(),
                retryable: true,
            })),
            ErrorClass::RetryableBackoff
        );
        assert_eq!(
            classify(&InferenceError::ApiError { status: 400, body: "bad".into() }),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn context_overflow_body_is_classified_distinctly() {
        assert_eq!(
            classify(&InferenceError::ApiError {
                status: 400,
                body: "This model's maximum context length is 200000 tokens".into(),
            }),
            ErrorClass::ContextOverflow
        );
        assert_eq!(
            classify(&InferenceError::Backend(ModelBackendError {
                status_code: 400,
                message: "context_length_exceeded".into(),
                retryable: false,
            })),
            ErrorClass::ContextOverflow
        );
    }
}
