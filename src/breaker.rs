//! Circuit breaker for the monitoring path
//!
//! ```text
//!            K failures within window
//!   CLOSED ───────────────────────────► OPEN
//!     ▲                                  │ cool-down elapsed
//!     │ trial succeeded                  ▼
//!     └──────────────────────────── HALF_OPEN ──► OPEN (trial failed)
//! ```
//!
//! The state lives behind a mutex that is only held while a single transition is
//! computed. Callers ask [`CircuitBreaker::try_acquire`] before an attempt and hand the
//! returned [`BreakerPermit`] back with [`record_success`](CircuitBreaker::record_success)
//! or [`record_failure`](CircuitBreaker::record_failure).
//!
//! Every transition starts a new generation. An outcome only counts if its permit was
//! granted in the current generation, so a call admitted before the circuit opened cannot
//! close or reopen it later, and only the trial call decides a HALF_OPEN circuit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct BreakerOptions {
    pub failure_threshold: usize,
    pub window: Duration,
    pub cool_down: Duration,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cool_down: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::BreakerConfig> for BreakerOptions {
    fn from(config: &crate::config::BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            window: config.window(),
            cool_down: config.cool_down(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpen {
    pub name: String,
}

/// Admission of one call, to be handed back with its outcome
#[derive(Debug)]
#[must_use = "hand the permit back with record_success or record_failure"]
pub struct BreakerPermit {
    generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub rejected: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,

    /// When each failure inside the current window was recorded
    failures: VecDeque<Instant>,

    open_until: Option<Instant>,

    /// When the outstanding half-open trial was granted
    trial_started: Option<Instant>,

    generation: u64,

    rejected: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    options: BreakerOptions,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl ToString, options: BreakerOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                open_until: None,
                trial_started: None,
                generation: 0,
                rejected: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may proceed right now.
    ///
    /// An OPEN breaker whose cool-down elapsed moves to HALF_OPEN and lets exactly this
    /// caller through as the trial.
    pub fn try_acquire(&self) -> Result<BreakerPermit, CircuitOpen> {
        let now = Instant::now();
        let mut inner = self.inner();

        match inner.state {
            CircuitState::Closed => {
                return Ok(BreakerPermit {
                    generation: inner.generation,
                });
            }
            CircuitState::Open => {
                if inner.open_until.is_some_and(|until| now >= until) {
                    debug!(breaker = %self.name, "cool-down elapsed, allowing trial call");
                    inner.state = CircuitState::HalfOpen;
                    return Ok(Self::grant_trial(&mut inner, now));
                }
            }
            CircuitState::HalfOpen => {
                // a trial that never reported back is given up on after one cool-down
                let lost = inner
                    .trial_started
                    .is_none_or(|started| now.duration_since(started) >= self.options.cool_down);
                if lost {
                    warn!(breaker = %self.name, "previous trial call never reported, allowing another");
                    return Ok(Self::grant_trial(&mut inner, now));
                }
            }
        }

        inner.rejected += 1;
        Err(CircuitOpen {
            name: self.name.clone(),
        })
    }

    pub fn record_success(&self, permit: BreakerPermit) {
        let now = Instant::now();
        let mut inner = self.inner();
        if self.is_stale(&inner, &permit) {
            return;
        }

        match inner.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "trial call succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.failures.clear();
                inner.open_until = None;
                inner.trial_started = None;
                inner.generation += 1;
            }
            CircuitState::Closed => self.prune(&mut inner, now),
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, permit: BreakerPermit) {
        let now = Instant::now();
        let mut inner = self.inner();
        if self.is_stale(&inner, &permit) {
            return;
        }

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "trial call failed, reopening circuit");
                self.open(&mut inner, now);
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune(&mut inner, now);

                if inner.failures.len() >= self.options.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        "{} failures within {:?}, opening circuit",
                        inner.failures.len(),
                        self.options.window
                    );
                    self.open(&mut inner, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.inner();
        self.prune(&mut inner, now);

        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            rejected: inner.rejected,
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.open_until = Some(now + self.options.cool_down);
        inner.trial_started = None;
        inner.generation += 1;
    }

    fn grant_trial(inner: &mut Inner, now: Instant) -> BreakerPermit {
        inner.trial_started = Some(now);
        inner.generation += 1;
        BreakerPermit {
            generation: inner.generation,
        }
    }

    /// Outcome of a call admitted before the last transition
    fn is_stale(&self, inner: &Inner, permit: &BreakerPermit) -> bool {
        let stale = permit.generation != inner.generation;
        if stale {
            trace!(breaker = %self.name, "ignoring outcome of a call from an earlier generation");
        }
        stale
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while inner
            .failures
            .front()
            .is_some_and(|at| now.duration_since(*at) > self.options.window)
        {
            inner.failures.pop_front();
        }
    }
}

/// One breaker per operation class, created on first use
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    options: BreakerOptions,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(options: BreakerOptions) -> Self {
        Self {
            options,
            breakers: Mutex::default(),
        }
    }

    pub fn get(&self, class: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(class.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(class, self.options.clone()))),
        )
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut snapshots: Vec<_> = breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
