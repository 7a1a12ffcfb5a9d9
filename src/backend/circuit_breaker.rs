//! Circuit breaker guarding calls to a named backend (spec §4.H). Ported
//! from `errors/circuit_breaker.py`: a sliding time window of failures trips
//! `closed -> open`, a timeout allows one probe (`half_open`), and either a
//! run of successes closes it again or a single failure trips it back open.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::CircuitBreakerOpenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub window_size: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            window_size: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_changes: u64,
}

struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    stats: CircuitStats,
}

/// Thread-safe; cheap to share behind an `Arc` across concurrent loop
/// instances hitting the same backend name (spec §5).
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                last_failure: None,
                half_open_successes: 0,
                stats: CircuitStats::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CircuitStats {
        self.inner.lock().unwrap().stats
    }

    fn should_attempt_reset(inner: &Inner, timeout: Duration) -> bool {
        match inner.last_failure {
            None => true,
            Some(t) => t.elapsed() >= timeout,
        }
    }

    fn transition(inner: &mut Inner, new_state: CircuitState) {
        inner.state = new_state;
        inner.stats.state_changes += 1;
        if new_state == CircuitState::HalfOpen {
            inner.half_open_successes = 0;
        }
        tracing::info!(circuit = %new_state_name(new_state), "circuit breaker transitioned");
    }

    fn clean_old_failures(inner: &mut Inner, window: Duration) {
        while let Some(&front) = inner.failures.front() {
            if front.elapsed() > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current state, performing the `open -> half_open` transition if the
    /// timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open && Self::should_attempt_reset(&inner, self.config.timeout) {
            Self::transition(&mut inner, CircuitState::HalfOpen);
        }
        inner.state
    }

    /// Call before attempting the guarded operation. Returns the typed error
    /// immediately if the circuit is open.
    pub fn allow_request(&self) -> Result<(), CircuitBreakerOpenError> {
        if self.state() != CircuitState::Open {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        inner.stats.rejected_calls += 1;
        Err(CircuitBreakerOpenError {
            name: self.name.clone(),
            time_until_retry: self.time_until_retry_locked(&inner),
        })
    }

    fn time_until_retry_locked(&self, inner: &Inner) -> f64 {
        if inner.state != CircuitState::Open {
            return 0.0;
        }
        match inner.last_failure {
            None => 0.0,
            Some(t) => (self.config.timeout.as_secs_f64() - t.elapsed().as_secs_f64()).max(0.0),
        }
    }

    pub fn time_until_retry(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        self.time_until_retry_locked(&inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_calls += 1;
        inner.stats.successful_calls += 1;

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                Self::transition(&mut inner, CircuitState::Closed);
                inner.failures.clear();
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stats.total_calls += 1;
        inner.stats.failed_calls += 1;

        let now = Instant::now();
        inner.failures.push_back(now);
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => Self::transition(&mut inner, CircuitState::Open),
            CircuitState::Closed => {
                Self::clean_old_failures(&mut inner, self.config.window_size);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    Self::transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.last_failure = None;
        inner.half_open_successes = 0;
    }
}

fn new_state_name(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_millis(20),
            window_size: Duration::from_secs(60),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", fast_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow_request().is_err());
    }

    #[test]
    fn half_open_after_timeout_then_closes_on_success_streak() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_trips_back_open() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn reset_forces_closed() {
        let cb = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
