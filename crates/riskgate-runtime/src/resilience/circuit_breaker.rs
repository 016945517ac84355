//! Circuit breaker to prevent cascade failures.
//!
//! When shadow calls fail repeatedly, the circuit opens and subsequent
//! escalations fall back to the rule-based score without touching the
//! provider. One breaker guards one remote capability.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::duration_str;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time spent open before a recovery probe is allowed
    #[serde(with = "duration_str")]
    pub recovery_timeout: Duration,

    /// Consecutive probe successes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected without invoking the operation
    Open,

    /// One probe at a time is let through to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a breaker, for audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_state_change: DateTime<Utc>,
}

/// Why a guarded call did not produce a value.
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error("Circuit open, call rejected")]
    Open,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Call failed: {0}")]
    Failed(E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
    last_state_change: DateTime<Utc>,
    probe_in_flight: bool,
}

impl Inner {
    fn transition(&mut self, name: &str, to: CircuitState) {
        let from = self.state;
        self.state = to;
        self.last_state_change = Utc::now();
        self.successes = 0;
        self.probe_in_flight = false;
        match to {
            CircuitState::Closed => {
                self.failures = 0;
                self.opened_at = None;
                tracing::info!(breaker = name, %from, "Circuit closed after successful recovery");
            }
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
                if from == CircuitState::HalfOpen {
                    tracing::warn!(breaker = name, "Circuit reopened after failed recovery attempt");
                } else {
                    tracing::warn!(
                        breaker = name,
                        failures = self.failures,
                        "Circuit opened after repeated failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = name, "Circuit transitioning to half-open for recovery test");
            }
        }
    }
}

/// Circuit breaker for a single remote capability.
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
                failures: 0,
                successes: 0,
                opened_at: None,
                last_state_change: Utc::now(),
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving OPEN to HALF_OPEN once the recovery timeout passed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Returns true if calls are currently rejected.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failures,
            success_count: inner.successes,
            last_state_change: inner.last_state_change,
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let recovered = inner
            .opened_at
            .map(|opened| opened.elapsed() >= self.config.recovery_timeout)
            .unwrap_or(true);
        if recovered {
            inner.transition(&self.name, CircuitState::HalfOpen);
        }
    }

    /// Ask to make a call.
    ///
    /// Returns `None` while the circuit is open, or while a half-open probe
    /// is already in flight.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => Some(CallPermit::new(self, false)),
            CircuitState::Open => None,
            CircuitState::HalfOpen if inner.probe_in_flight => None,
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                Some(CallPermit::new(self, true))
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    inner.transition(&self.name, CircuitState::Closed);
                }
            }
            // Outcome of a call admitted under an earlier state
            _ => {}
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.failures += 1;
                inner.transition(&self.name, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Run `operation` through the breaker with a timeout.
    ///
    /// Errors and timeouts count as failures. If the returned future is
    /// dropped before completion, no outcome is recorded.
    pub async fn call<T, E, F>(&self, timeout: Duration, operation: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or(CallError::Open)?;
        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure();
                Err(CallError::Failed(e))
            }
            Err(_) => {
                permit.failure();
                Err(CallError::Timeout(timeout))
            }
        }
    }

    /// Reset to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            inner.transition(&self.name, CircuitState::Closed);
        }
        inner.failures = 0;
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

/// Permission to make one call. Report the outcome with
/// [`success`](Self::success) or [`failure`](Self::failure); dropping it
/// unreported frees a half-open probe slot without counting anything.
#[must_use]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
