//! Circuit breaker for inference calls
//!
//! State machine:
//!
//! ```text
//!   CLOSED --(failure_threshold consecutive failures)--> OPEN
//!   OPEN   --(reset_timeout elapsed, checked lazily)---> HALF_OPEN
//!   HALF_OPEN --(half_open_max_calls successes)------> CLOSED
//!   HALF_OPEN --(any trial failure)--------------------> OPEN
//! ```
//!
//! The OPEN -> HALF_OPEN transition has no timer task behind it; it is
//! evaluated whenever a call is attempted or the state is read. Every
//! transition bumps a generation counter so completions of calls admitted
//! under an earlier state are ignored.

use binwise_core::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on the retry hint given while half-open trials are in flight
const HALF_OPEN_RETRY_HINT: Duration = Duration::from_secs(1);

/// Breaker state
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
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Time spent OPEN before a trial is allowed
    pub reset_timeout: Duration,
    /// Concurrent trials admitted while HALF_OPEN, and successes needed to close
    pub half_open_max_calls: u32,
    /// Per-call time budget; exceeding it counts as a failure. `None` disables it.
    pub call_timeout: Option<Duration>,
}

/// Per-call budget applied unless a config opts out
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::config("failure_threshold must be at least 1"));
        }
        if self.half_open_max_calls == 0 {
            return Err(Error::config("half_open_max_calls must be at least 1"));
        }
        if self.call_timeout == Some(Duration::ZERO) {
            return Err(Error::config("call_timeout must be positive"));
        }
        Ok(())
    }
}

/// Point-in-time view of a breaker, for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    /// Consecutive failures in the current epoch
    pub failure_count: u32,
    /// Every attempt, rejected ones included
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

/// Whether an OPEN breaker has waited long enough to try again
pub fn reset_timeout_elapsed(
    now: Instant,
    last_failure: Option<Instant>,
    reset_timeout: Duration,
) -> bool {
    match last_failure {
        Some(at) => now.saturating_duration_since(at) >= reset_timeout,
        None => true,
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    generation: u64,
    forced_open: bool,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
            generation: 0,
            forced_open: false,
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn transition(&mut self, name: &str, to: CircuitState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.generation += 1;
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;

        match to {
            CircuitState::Open => warn!(breaker = name, %from, "Circuit breaker opened"),
            CircuitState::HalfOpen => info!(breaker = name, "Circuit breaker half-open, admitting trial calls"),
            CircuitState::Closed => info!(breaker = name, %from, "Circuit breaker closed"),
        }
        metrics::counter!(
            "binwise_breaker_transitions_total",
            "breaker" => name.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    /// Apply the lazy OPEN -> HALF_OPEN transition
    fn refresh(&mut self, name: &str, now: Instant, reset_timeout: Duration) {
        if self.state == CircuitState::Open
            && !self.forced_open
            && reset_timeout_elapsed(now, self.last_failure, reset_timeout)
        {
            self.transition(name, CircuitState::HalfOpen);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
    trial: bool,
}

/// Releases a half-open slot if the call is dropped before it completes
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl PermitGuard<'_> {
    fn settle(mut self, outcome: std::result::Result<(), ()>) {
        self.settled = true;
        match outcome {
            Ok(()) => self.breaker.on_success(self.permit),
            Err(()) => self.breaker.on_failure(self.permit),
        }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.permit);
        }
    }
}

/// Failure-isolating wrapper around one dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, after applying any due OPEN -> HALF_OPEN transition
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        inner.refresh(&self.name, Instant::now(), self.config.reset_timeout);
        inner.state
    }

    /// Run `f` under the breaker.
    ///
    /// Rejected attempts return [`Error::BreakerOpen`] without calling `f`.
    /// Any error from `f`, or exceeding `call_timeout`, counts as a failure.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        let guard = PermitGuard {
            breaker: self,
            permit,
            settled: false,
        };

        let result = match self.config.call_timeout {
            Some(budget) => match tokio::time::timeout(budget, f()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    operation: format!("{} call", self.name),
                    after: budget,
                }),
            },
            None => f().await,
        };

        guard.settle(result.as_ref().map(|_| ()).map_err(|_| ()));
        result
    }

    /// Hold the breaker OPEN until [`force_close`](Self::force_close)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.forced_open = true;
        inner.last_failure = Some(Instant::now());
        inner.transition(&self.name, CircuitState::Open);
    }

    /// Close the breaker and clear its failure history
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        inner.forced_open = false;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.transition(&self.name, CircuitState::Closed);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let mut inner = self.inner.lock();
        inner.refresh(&self.name, Instant::now(), self.config.reset_timeout);
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    fn try_acquire(&self) -> Result<Permit> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.refresh(&self.name, now, self.config.reset_timeout);

        let retry_after = match inner.state {
            CircuitState::Closed => {
                return Ok(Permit {
                    generation: inner.generation,
                    trial: false,
                })
            }
            CircuitState::HalfOpen if inner.half_open_in_flight < self.config.half_open_max_calls => {
                inner.half_open_in_flight += 1;
                debug!(breaker = %self.name, "Admitting half-open trial");
                return Ok(Permit {
                    generation: inner.generation,
                    trial: true,
                });
            }
            CircuitState::HalfOpen => self.config.reset_timeout.min(HALF_OPEN_RETRY_HINT),
            CircuitState::Open if inner.forced_open => self.config.reset_timeout,
            CircuitState::Open => {
                let waited = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                self.config.reset_timeout.saturating_sub(waited)
            }
        };

        inner.total_rejections += 1;
        metrics::counter!("binwise_breaker_rejections_total", "breaker" => self.name.clone())
            .increment(1);
        Err(Error::BreakerOpen {
            name: self.name.clone(),
            retry_after,
        })
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if permit.generation != inner.generation {
            debug!(breaker = %self.name, "Ignoring stale success");
            return;
        }

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if permit.trial => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    inner.failure_count = 0;
                    inner.last_failure = None;
                    inner.transition(&self.name, CircuitState::Closed);
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, permit: Permit) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        if permit.generation != inner.generation {
            debug!(breaker = %self.name, "Ignoring stale failure");
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure = Some(now);
                if inner.failure_count >= self.config.failure_threshold {
                    inner.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if permit.trial => {
                inner.failure_count += 1;
                inner.last_failure = Some(now);
                inner.transition(&self.name, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn on_abandoned(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if permit.trial
            && permit.generation == inner.generation
            && inner.state == CircuitState::HalfOpen
        {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}
