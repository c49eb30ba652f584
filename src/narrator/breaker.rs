//! Rolling-window circuit breaker for the narrator call.
//!
//! `failure_threshold` failures within `failure_window` open the circuit for
//! `cooldown`. After the cooldown one probe call is admitted (half-open); its
//! success closes the circuit, its failure re-opens it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: usize,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl BreakerConfig {
    pub fn from_narrator(config: &crate::config::NarratorConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            failure_window: Duration::from_secs(config.failure_window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { until: Instant },
    /// A single probe call is in flight.
    HalfOpen,
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    phase: Phase,
    failures: VecDeque<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: BreakerConfig,
}

/// An admitted call. Report its outcome with [`BreakerPermit::success`] or
/// [`BreakerPermit::failure`]; a half-open call dropped without either
/// (caller cancelled, task aborted) re-opens the circuit.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.half_open {
            self.breaker.abandon_half_open();
        }
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                failures: VecDeque::new(),
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a call, or return how long until the circuit may be probed.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, Duration> {
        let mut inner = self.lock();
        let now = Instant::now();
        let half_open = match inner.phase {
            Phase::Closed => false,
            Phase::Open { until } if now >= until => {
                inner.phase = Phase::HalfOpen;
                true
            }
            Phase::Open { until } => return Err(until - now),
            Phase::HalfOpen => return Err(Duration::ZERO),
        };
        Ok(BreakerPermit {
            breaker: self,
            half_open,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.phase == Phase::HalfOpen {
            tracing::info!("narrator circuit closed");
        }
        inner.phase = Phase::Closed;
        inner.failures.clear();
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.phase {
            Phase::HalfOpen => {
                inner.phase = Phase::Open {
                    until: now + self.config.cooldown,
                };
                tracing::warn!(cooldown_secs = self.config.cooldown.as_secs(), "narrator probe failed, circuit re-opened");
            }
            Phase::Closed => {
                inner.failures.push_back(now);
                while inner
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > self.config.failure_window)
                {
                    inner.failures.pop_front();
                }
                if inner.failures.len() >= self.config.failure_threshold {
                    inner.phase = Phase::Open {
                        until: now + self.config.cooldown,
                    };
                    inner.failures.clear();
                    tracing::warn!(
                        threshold = self.config.failure_threshold,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "narrator circuit opened"
                    );
                }
            }
            Phase::Open { .. } => {}
        }
    }

    fn abandon_half_open(&self) {
        let mut inner = self.lock();
        if inner.phase == Phase::HalfOpen {
            inner.phase = Phase::Open {
                until: Instant::now() + self.config.cooldown,
            };
            tracing::warn!("half-open narrator call abandoned, circuit re-opened");
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.lock().phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { until } if Instant::now() < until => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }
}
