//! Circuit breaker for upstream endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through, failures are counted
//! - Open: endpoint assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls test for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures in the rolling window reach the threshold
//!                (or the failure rate does, once enough calls were seen)
//! Open → Half-Open: first call after the cooldown elapses
//! Half-Open → Closed: enough consecutive trial successes
//! Half-Open → Open: a trial fails; cooldown grows up to its ceiling
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Every permit carries the generation it was issued in; outcomes reported
//!   after a transition are ignored
//! - A permit dropped without a verdict frees its trial slot and counts as nothing

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned instead of attempting a call while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit open for {endpoint}, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub endpoint: String,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
    Abandoned,
}

/// Admission ticket for one call. Report the result with
/// [`CallPermit::success`] or [`CallPermit::failure`].
#[must_use = "report the call outcome on the permit"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settle(Verdict::Success);
    }

    pub fn failure(mut self) {
        self.settle(Verdict::Failure);
    }

    fn settle(&mut self, verdict: Verdict) {
        if !self.settled {
            self.settled = true;
            self.breaker.settle(self.generation, self.trial, verdict);
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        self.settle(Verdict::Abandoned);
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("endpoint", &self.breaker.endpoint)
            .field("generation", &self.generation)
            .field("trial", &self.trial)
            .finish()
    }
}

struct BreakerInner {
    state: CircuitState,
    generation: u64,
    /// (time, failed) per settled call while closed.
    window: VecDeque<(Instant, bool)>,
    opened_at: Instant,
    cooldown: Duration,
    trials_in_flight: u32,
    trial_successes: u32,
    times_opened: u64,
}

pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    rejections: AtomicU64,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub recent_failures: usize,
    pub recent_calls: usize,
    pub cooldown_ms: u64,
    pub times_opened: u64,
    pub rejections: u64,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let cooldown = config.cooldown();
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                window: VecDeque::new(),
                opened_at: Instant::now(),
                cooldown,
                trials_in_flight: 0,
                trial_successes: 0,
                times_opened: 0,
            }),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask to make one call.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpenError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(self.permit(inner.generation, false)),
            CircuitState::Open => {
                let ready_at = inner.opened_at + inner.cooldown;
                if now >= ready_at {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trials_in_flight = 1;
                    Ok(self.permit(inner.generation, true))
                } else {
                    drop(inner);
                    Err(self.reject(ready_at - now))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_max_trials {
                    inner.trials_in_flight += 1;
                    Ok(self.permit(inner.generation, true))
                } else {
                    drop(inner);
                    Err(self.reject(Duration::ZERO))
                }
            }
        }
    }

    fn permit(self: &Arc<Self>, generation: u64, trial: bool) -> CallPermit {
        CallPermit {
            breaker: Arc::clone(self),
            generation,
            trial,
            settled: false,
        }
    }

    fn reject(&self, retry_after: Duration) -> CircuitOpenError {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_rejection(&self.endpoint);
        CircuitOpenError {
            endpoint: self.endpoint.clone(),
            retry_after,
        }
    }

    fn settle(&self, generation: u64, trial: bool, verdict: Verdict) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if generation != inner.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                if verdict == Verdict::Abandoned {
                    return;
                }
                inner.window.push_back((now, verdict == Verdict::Failure));
                self.prune(&mut inner, now);
                if verdict == Verdict::Failure && self.should_trip(&inner) {
                    inner.cooldown = self.config.cooldown();
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                if trial {
                    inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                }
                match verdict {
                    Verdict::Success => {
                        inner.trial_successes += 1;
                        if inner.trial_successes >= self.config.success_threshold {
                            inner.cooldown = self.config.cooldown();
                            self.transition(&mut inner, CircuitState::Closed);
                        }
                    }
                    Verdict::Failure => {
                        let grown = inner
                            .cooldown
                            .mul_f64(self.config.cooldown_multiplier)
                            .min(self.config.max_cooldown());
                        inner.cooldown = grown;
                        self.open(&mut inner, now);
                    }
                    Verdict::Abandoned => {}
                }
            }
            // Permits are never issued while open.
            CircuitState::Open => {}
        }
    }

    fn prune(&self, inner: &mut BreakerInner, now: Instant) {
        let window = self.config.window();
        while inner
            .window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            inner.window.pop_front();
        }
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        let failures = inner.window.iter().filter(|(_, failed)| *failed).count();
        if failures as u32 >= self.config.failure_threshold {
            return true;
        }
        let calls = inner.window.len();
        self.config.failure_rate > 0.0
            && calls as u32 >= self.config.min_calls.max(1)
            && failures as f64 / calls as f64 >= self.config.failure_rate
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.opened_at = now;
        inner.times_opened += 1;
        self.transition(inner, CircuitState::Open);
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.window.clear();
        inner.trials_in_flight = 0;
        inner.trial_successes = 0;

        match to {
            CircuitState::Open => tracing::warn!(
                endpoint = %self.endpoint,
                from = %from,
                cooldown_ms = inner.cooldown.as_millis() as u64,
                "Circuit opened"
            ),
            _ => tracing::info!(
                endpoint = %self.endpoint,
                from = %from,
                to = %to,
                "Circuit state changed"
            ),
        }
        metrics::record_circuit_state(&self.endpoint, to);
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.prune(&mut inner, now);
        CircuitSnapshot {
            endpoint: self.endpoint.clone(),
            state: inner.state,
            recent_failures: inner.window.iter().filter(|(_, failed)| *failed).count(),
            recent_calls: inner.window.len(),
            cooldown_ms: inner.cooldown.as_millis() as u64,
            times_opened: inner.times_opened,
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

/// One breaker per endpoint, created on first use.
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.clone())));
        Arc::clone(entry.value())
    }

    /// State of `endpoint`; endpoints never called are closed.
    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.breakers
            .get(endpoint)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            window_secs: 10,
            cooldown_ms: 1_000,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 3_000,
            half_open_max_trials: 1,
            success_threshold: 2,
            ..CircuitBreakerConfig::default()
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("https://api.test:443", config()))
    }

    fn fail_times(b: &Arc<CircuitBreaker>, n: usize) {
        for _ in 0..n {
            b.try_acquire().unwrap().failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold_and_fails_fast() {
        let b = breaker();
        fail_times(&b, 2);
        assert_eq!(b.state(), CircuitState::Closed);
        fail_times(&b, 1);
        assert_eq!(b.state(), CircuitState::Open);

        let err = b.try_acquire().unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(1));
        assert_eq!(b.snapshot().rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_do_not_count() {
        let b = breaker();
        fail_times(&b, 2);
        tokio::time::advance(Duration::from_secs(11)).await;
        fail_times(&b, 2);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_bounded_trials() {
        let b = breaker();
        fail_times(&b, 3);
        tokio::time::advance(Duration::from_millis(1_000)).await;

        let trial = b.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire().is_err());

        // an unreported trial frees its slot
        drop(trial);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_successes_close() {
        let b = breaker();
        fail_times(&b, 3);
        tokio::time::advance(Duration::from_secs(1)).await;

        b.try_acquire().unwrap().success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.try_acquire().unwrap().success();
        assert_eq!(b.state(), CircuitState::Closed);

        // tally was reset: two more failures keep it closed
        fail_times(&b, 2);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens_with_longer_cooldown() {
        let b = breaker();
        fail_times(&b, 3);

        tokio::time::advance(Duration::from_secs(1)).await;
        b.try_acquire().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.try_acquire().unwrap_err().retry_after, Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(2)).await;
        b.try_acquire().unwrap().failure();
        // capped at max_cooldown
        assert_eq!(b.try_acquire().unwrap_err().retry_after, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_outcomes_are_ignored() {
        let b = breaker();
        let late = b.try_acquire().unwrap();
        fail_times(&b, 3);
        tokio::time::advance(Duration::from_secs(1)).await;
        b.try_acquire().unwrap().success();
        b.try_acquire().unwrap().success();
        assert_eq!(b.state(), CircuitState::Closed);

        // issued before the circuit opened; must not count against the new generation
        late.failure();
        assert_eq!(b.snapshot().recent_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_rate_rule() {
        let cfg = CircuitBreakerConfig {
            failure_threshold: 100,
            failure_rate: 0.5,
            min_calls: 4,
            ..config()
        };
        let b = Arc::new(CircuitBreaker::new("https://rate.test:443", cfg));
        b.try_acquire().unwrap().success();
        b.try_acquire().unwrap().failure();
        b.try_acquire().unwrap().success();
        assert_eq!(b.state(), CircuitState::Closed);
        b.try_acquire().unwrap().failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn registry_reuses_breakers() {
        let registry = CircuitBreakers::new(config());
        let a = registry.get("https://a:443");
        let again = registry.get("https://a:443");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(registry.state("https://b:443"), CircuitState::Closed);
        assert_eq!(registry.snapshot().len(), 1);
    }
}
