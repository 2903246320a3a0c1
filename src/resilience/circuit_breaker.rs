//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: target assumed down, calls fail fast
//! - Half-Open: a limited number of trial calls test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold (consecutive)
//! Open → Half-Open: first call at/after next_attempt_at (before it runs)
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any trial fails
//! any → Closed: reset()
//! ```
//!
//! # Design Decisions
//! - One instance per downstream target (not global)
//! - At most `success_threshold` trials in flight while Half-Open
//! - Outcomes of calls admitted under an earlier state are not counted
//! - A trial that is dropped or panics frees its slot without recording an outcome

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::timeouts;
use crate::runtime::{Clock, EventBus, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for one breaker. Every field is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
    pub call_timeout: Duration,
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            success_threshold: config.success_threshold,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }
}

/// Point-in-time view of a breaker's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<SystemTime>,
    pub next_attempt_at: Option<SystemTime>,
}

/// A state change, delivered to `on_state_change` subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    pub target: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Errors returned by `CircuitBreaker::execute`.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit open for target '{target}'")]
    Open {
        target: String,
        retry_at: Option<SystemTime>,
    },

    /// The operation exceeded the per-call timeout.
    #[error("call to '{target}' timed out after {}ms", .after.as_millis())]
    Timeout { target: String, after: Duration },

    /// The operation's own error, unchanged.
    #[error(transparent)]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Admission for one call. Dropping it unsettled (caller gave up, operation
/// panicked) hands a half-open trial slot back without counting an outcome.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    settled: bool,
}

impl Permit<'_> {
    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.on_success(self.epoch);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.epoch);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.epoch);
        }
    }
}

struct Inner {
    snapshot: CircuitSnapshot,
    /// Bumped on every transition; stale outcomes are ignored.
    epoch: u64,
    trials_in_flight: u32,
}

/// Guards calls to one downstream target.
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    events: EventBus<CircuitTransition>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            target: target.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                snapshot: CircuitSnapshot {
                    state: CircuitState::Closed,
                    failure_count: 0,
                    success_count: 0,
                    opened_at: None,
                    next_attempt_at: None,
                },
                epoch: 0,
                trials_in_flight: 0,
            }),
            events: EventBus::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().snapshot.state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.lock().snapshot.clone()
    }

    /// Run `operation` if the circuit admits it. Every error counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Like `execute`, but only errors for which `is_failure` returns true
    /// count against the target. Other errors still reach the caller unchanged
    /// and are recorded as successes (the target answered).
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let permit = self.acquire()?;

        match timeouts::enforce(self.config.call_timeout, operation()).await {
            Ok(Ok(value)) => {
                permit.succeeded();
                Ok(value)
            }
            Ok(Err(e)) => {
                if is_failure(&e) {
                    permit.failed();
                } else {
                    permit.succeeded();
                }
                Err(BreakerError::Operation(e))
            }
            Err(timeout) => {
                tracing::warn!(breaker = %self.target, after_ms = timeout.after.as_millis() as u64, "Call timed out");
                permit.failed();
                Err(BreakerError::Timeout {
                    target: self.target.clone(),
                    after: timeout.after,
                })
            }
        }
    }

    /// Force the circuit closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let transition = self.transition(&mut inner, CircuitState::Closed);
        drop(inner);

        tracing::info!(breaker = %self.target, "Circuit breaker manually reset");
        self.publish(transition);
    }

    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CircuitTransition) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn acquire<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let mut transition = None;

        match inner.snapshot.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let due = inner.snapshot.next_attempt_at.map_or(true, |at| now >= at);
                if !due {
                    return Err(self.reject(&inner));
                }
                transition = self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trials_in_flight = 1;
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight >= self.config.success_threshold {
                    return Err(self.reject(&inner));
                }
                inner.trials_in_flight += 1;
            }
        }

        let permit = Permit {
            breaker: self,
            epoch: inner.epoch,
            settled: false,
        };
        drop(inner);
        self.publish(transition);
        Ok(permit)
    }

    fn reject<E>(&self, inner: &Inner) -> BreakerError<E> {
        metrics::record_breaker_rejection(&self.target);
        tracing::debug!(breaker = %self.target, state = %inner.snapshot.state, "Call rejected, circuit open");
        BreakerError::Open {
            target: self.target.clone(),
            retry_at: inner.snapshot.next_attempt_at,
        }
    }

    fn on_success(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }

        let transition = match inner.snapshot.state {
            CircuitState::Closed => {
                inner.snapshot.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.snapshot.success_count += 1;
                if inner.snapshot.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        };
        drop(inner);
        self.publish(transition);
    }

    fn on_failure(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return;
        }

        let transition = match inner.snapshot.state {
            CircuitState::Closed => {
                inner.snapshot.failure_count += 1;
                if inner.snapshot.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => None,
        };
        drop(inner);
        self.publish(transition);
    }

    fn on_abandoned(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch == epoch && inner.snapshot.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            tracing::debug!(breaker = %self.target, "Half-open trial abandoned, slot released");
        }
    }

    /// Apply a state change and its counter resets. Returns the transition to publish.
    fn transition(&self, inner: &mut Inner, to: CircuitState) -> Option<CircuitTransition> {
        let from = inner.snapshot.state;
        let now = self.clock.now();

        inner.epoch += 1;
        inner.trials_in_flight = 0;
        let snap = &mut inner.snapshot;
        snap.state = to;
        snap.success_count = 0;
        match to {
            CircuitState::Closed => {
                snap.failure_count = 0;
                snap.opened_at = None;
                snap.next_attempt_at = None;
            }
            CircuitState::Open => {
                snap.failure_count = 0;
                snap.opened_at = Some(now);
                snap.next_attempt_at = Some(now + self.config.reset_timeout);
            }
            CircuitState::HalfOpen => {}
        }

        (from != to).then(|| CircuitTransition {
            target: self.target.clone(),
            from,
            to,
        })
    }

    fn publish(&self, transition: Option<CircuitTransition>) {
        let Some(transition) = transition else { return };

        match transition.to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.target,
                from = %transition.from,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit opened"
            ),
            _ => tracing::info!(
                breaker = %self.target,
                from = %transition.from,
                to = %transition.to,
                "Circuit state changed"
            ),
        }
        metrics::record_breaker_transition(&self.target, transition.to.as_str());
        self.events.emit(&transition);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
