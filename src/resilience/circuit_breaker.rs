//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: one probe tests whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive transient failures >= threshold within window
//! Open → Half-Open: after cooldown
//! Half-Open → Closed: probe succeeds (counter reset, cooldown reset)
//! Half-Open → Open: probe fails (cooldown grows up to max_cooldown)
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream target; all transitions under one mutex
//! - The mutex is never held across I/O; callers hold a [`Permit`] instead
//! - Permanent failures do not count against the upstream
//! - A probe permit dropped without a result frees the probe slot

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::resilience::events::{ResilienceEvent, ResilienceEvents};
use crate::resilience::Outcome;

/// Retry hint given while another caller holds the half-open probe.
const PROBE_BUSY_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
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

/// The breaker refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub retry_after: Duration,
}

/// Point-in-time view for health and admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub cooldown_secs: f64,
    /// Time until a probe is allowed, when open.
    pub retry_after_secs: Option<f64>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    cooldown: Duration,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    target: String,
    threshold: u32,
    window: Duration,
    base_cooldown: Duration,
    growth: f64,
    max_cooldown: Duration,
    inner: Mutex<Inner>,
    events: Arc<dyn ResilienceEvents>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: &CircuitBreakerConfig, events: Arc<dyn ResilienceEvents>) -> Self {
        let base_cooldown = Duration::from_secs(config.cooldown_secs);
        Self {
            target: target.into(),
            threshold: config.failure_threshold.max(1),
            window: Duration::from_secs(config.window_secs),
            base_cooldown,
            growth: config.cooldown_growth.max(1.0),
            max_cooldown: Duration::from_secs(config.max_cooldown_secs).max(base_cooldown),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                first_failure_at: None,
                opened_at: None,
                cooldown: base_cooldown,
                probe_in_flight: false,
            }),
            events,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state. An open circuit whose cooldown elapsed still reports
    /// `Open` until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        let retry_after = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(inner.cooldown.saturating_sub(opened_at.elapsed()).as_secs_f64())
            }
            _ => None,
        };
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown_secs: inner.cooldown.as_secs_f64(),
            retry_after_secs: retry_after,
        }
    }

    /// Ask permission to contact the upstream.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejected> {
        let now = Instant::now();
        let mut event = None;

        let decision = {
            let mut inner = self.inner.lock();

            if inner.state == CircuitState::Open {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= inner.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                    event = Some(ResilienceEvent::CircuitHalfOpen {
                        target: self.target.clone(),
                    });
                } else {
                    let retry_after = inner.cooldown - elapsed;
                    event = Some(ResilienceEvent::CallRejected {
                        target: self.target.clone(),
                        retry_after,
                    });
                }
            }

            match inner.state {
                CircuitState::Closed => Ok(false),
                CircuitState::HalfOpen if !inner.probe_in_flight => {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
                CircuitState::HalfOpen => Err(Rejected {
                    retry_after: PROBE_BUSY_RETRY_AFTER,
                }),
                CircuitState::Open => {
                    let opened_at = inner.opened_at.unwrap_or(now);
                    Err(Rejected {
                        retry_after: inner.cooldown.saturating_sub(now.saturating_duration_since(opened_at)),
                    })
                }
            }
        };

        if let Some(event) = event {
            self.events.emit(event);
        }

        decision.map(|probe| Permit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn on_result(&self, probe: bool, outcome: Outcome) {
        let now = Instant::now();
        let event = {
            let mut inner = self.inner.lock();
            match outcome {
                Outcome::Success => self.on_success(&mut inner, probe),
                Outcome::TransientFailure => self.on_transient_failure(&mut inner, probe, now),
                Outcome::PermanentFailure => {
                    if probe && inner.state == CircuitState::HalfOpen {
                        inner.probe_in_flight = false;
                    }
                    None
                }
            }
        };
        if let Some(event) = event {
            self.events.emit(event);
        }
    }

    fn on_success(&self, inner: &mut Inner, probe: bool) -> Option<ResilienceEvent> {
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.first_failure_at = None;
                None
            }
            CircuitState::HalfOpen if probe => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.first_failure_at = None;
                inner.opened_at = None;
                inner.cooldown = self.base_cooldown;
                inner.probe_in_flight = false;
                Some(ResilienceEvent::CircuitClosed {
                    target: self.target.clone(),
                })
            }
            // Late results from calls admitted before the circuit opened.
            _ => None,
        }
    }

    fn on_transient_failure(&self, inner: &mut Inner, probe: bool, now: Instant) -> Option<ResilienceEvent> {
        match inner.state {
            CircuitState::Closed => {
                let window_expired = inner
                    .first_failure_at
                    .map_or(true, |first| now.saturating_duration_since(first) > self.window);
                if window_expired {
                    inner.consecutive_failures = 0;
                    inner.first_failure_at = Some(now);
                }
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.cooldown = self.base_cooldown;
                    Some(ResilienceEvent::CircuitOpened {
                        target: self.target.clone(),
                        consecutive_failures: inner.consecutive_failures,
                        cooldown: inner.cooldown,
                        after_probe: false,
                    })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if probe => {
                let grown = inner.cooldown.mul_f64(self.growth).min(self.max_cooldown);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.cooldown = grown;
                inner.probe_in_flight = false;
                inner.consecutive_failures += 1;
                Some(ResilienceEvent::CircuitOpened {
                    target: self.target.clone(),
                    consecutive_failures: inner.consecutive_failures,
                    cooldown: grown,
                    after_probe: true,
                })
            }
            _ => None,
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }
}

/// Permission for one call. Report the outcome with [`Permit::record`].
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    /// Whether this call is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.on_result(self.probe, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
