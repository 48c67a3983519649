//! Resilience events and the sinks that receive them.
//!
//! The breaker and the retry loop never log directly. They hand a
//! [`ResilienceEvent`] to whatever [`ResilienceEvents`] sink they were built
//! with; production wiring uses [`TracingEvents`].

use std::time::Duration;

use parking_lot::Mutex;

use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitState;

#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// Closed → Open, or HalfOpen → Open after a failed probe.
    CircuitOpened {
        target: String,
        consecutive_failures: u32,
        cooldown: Duration,
        after_probe: bool,
    },
    CircuitHalfOpen {
        target: String,
    },
    CircuitClosed {
        target: String,
    },
    /// A call was refused without contacting the upstream.
    CallRejected {
        target: String,
        retry_after: Duration,
    },
    RetryScheduled {
        target: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
}

impl ResilienceEvent {
    /// State the circuit is in after this event, for transition events.
    pub fn resulting_state(&self) -> Option<CircuitState> {
        match self {
            ResilienceEvent::CircuitOpened { .. } => Some(CircuitState::Open),
            ResilienceEvent::CircuitHalfOpen { .. } => Some(CircuitState::HalfOpen),
            ResilienceEvent::CircuitClosed { .. } => Some(CircuitState::Closed),
            _ => None,
        }
    }
}

/// Receiver of resilience events.
pub trait ResilienceEvents: Send + Sync {
    fn emit(&self, event: ResilienceEvent);
}

/// Writes events as structured tracing records and metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl ResilienceEvents for TracingEvents {
    fn emit(&self, event: ResilienceEvent) {
        match &event {
            ResilienceEvent::CircuitOpened {
                target,
                consecutive_failures,
                cooldown,
                after_probe,
            } => {
                tracing::warn!(
                    target_name = %target,
                    consecutive_failures,
                    cooldown_secs = cooldown.as_secs_f64(),
                    after_probe,
                    "Circuit opened"
                );
            }
            ResilienceEvent::CircuitHalfOpen { target } => {
                tracing::info!(target_name = %target, "Circuit half-open, allowing probe");
            }
            ResilienceEvent::CircuitClosed { target } => {
                tracing::info!(target_name = %target, "Circuit closed");
            }
            ResilienceEvent::CallRejected { target, retry_after } => {
                tracing::debug!(
                    target_name = %target,
                    retry_after_secs = retry_after.as_secs_f64(),
                    "Call rejected by open circuit"
                );
            }
            ResilienceEvent::RetryScheduled {
                target,
                attempt,
                delay,
                reason,
            } => {
                tracing::warn!(
                    target_name = %target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Retrying upstream call"
                );
                metrics::record_retry(target);
            }
        }

        if let Some(state) = event.resulting_state() {
            metrics::record_circuit_state(state);
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Delays of every scheduled retry, in order.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ResilienceEvent::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Circuit transitions, in order.
    pub fn transitions(&self) -> Vec<CircuitState> {
        self.events
            .lock()
            .iter()
            .filter_map(ResilienceEvent::resulting_state)
            .collect()
    }
}

impl ResilienceEvents for RecordingEvents {
    fn emit(&self, event: ResilienceEvent) {
        self.events.lock().push(event);
    }
}
