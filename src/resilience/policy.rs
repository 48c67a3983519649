//! Retry and circuit breaking composed around a single call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::events::{ResilienceEvent, ResilienceEvents};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::{attempt_budget, Deadline};
use crate::resilience::Outcome;

/// Why [`ResiliencePolicy::execute`] gave up without a call result.
#[derive(Debug, Error)]
pub enum PolicyError<E> {
    #[error("circuit open, retry after {}s", .retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    #[error("upstream call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream call failed: {0}")]
    Call(E),
}

pub struct ResiliencePolicy {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    events: Arc<dyn ResilienceEvents>,
}

impl ResiliencePolicy {
    pub fn new(
        target: impl Into<String>,
        breaker: &CircuitBreakerConfig,
        retries: &RetryConfig,
        attempt_timeout: Duration,
        events: Arc<dyn ResilienceEvents>,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(target, breaker, events.clone()),
            retry: RetryPolicy::from_config(retries),
            attempt_timeout,
            events,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `call` under the breaker, retrying transient failures.
    ///
    /// `call` receives the 0-based attempt number. `classify` decides what a
    /// result means; a timed-out attempt is always transient. The last call
    /// result is returned as is, so an `Ok` value the classifier considered a
    /// failure still reaches the caller once retries are exhausted.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        mut call: F,
        classify: C,
        deadline: Option<Deadline>,
    ) -> Result<T, PolicyError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&Result<T, E>) -> Outcome,
    {
        let mut attempt: u32 = 0;

        loop {
            let permit = self
                .breaker
                .try_acquire()
                .map_err(|rejected| PolicyError::CircuitOpen {
                    retry_after: rejected.retry_after,
                })?;

            let Some(budget) = attempt_budget(self.attempt_timeout, deadline) else {
                drop(permit);
                return Err(PolicyError::Timeout(Duration::ZERO));
            };

            let result = tokio::time::timeout(budget, call(attempt)).await;
            let outcome = match &result {
                Ok(r) => classify(r),
                Err(_) => Outcome::TransientFailure,
            };
            permit.record(outcome);

            let next = attempt + 1;
            if outcome == Outcome::TransientFailure && self.retry.allows(next) {
                let delay = self.retry.delay_for(next);
                let fits = deadline.map_or(true, |d| d.remaining() > delay);
                if fits {
                    self.events.emit(ResilienceEvent::RetryScheduled {
                        target: self.breaker.target().to_string(),
                        attempt: next,
                        delay,
                        reason: match &result {
                            Ok(_) => "transient failure".to_string(),
                            Err(_) => format!("attempt timed out after {}ms", budget.as_millis()),
                        },
                    });
                    tokio::time::sleep(delay).await;
                    attempt = next;
                    continue;
                }
            }

            return match result {
                Ok(r) => r.map_err(PolicyError::Call),
                Err(_) => Err(PolicyError::Timeout(budget)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use crate::resilience::events::RecordingEvents;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum Reply {
        Ok,
        Unavailable,
        NotFound,
    }

    fn classify(result: &Result<Reply, String>) -> Outcome {
        match result {
            Ok(Reply::Ok) => Outcome::Success,
            Ok(Reply::Unavailable) | Err(_) => Outcome::TransientFailure,
            Ok(Reply::NotFound) => Outcome::PermanentFailure,
        }
    }

    fn policy(threshold: u32, max_retries: u32) -> (ResiliencePolicy, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::new());
        let breaker = CircuitBreakerConfig {
            failure_threshold: threshold,
            ..CircuitBreakerConfig::default()
        };
        let retries = RetryConfig {
            max_retries,
            ..RetryConfig::default()
        };
        let policy = ResiliencePolicy::new("upstream", &breaker, &retries, Duration::from_secs(30), events.clone());
        (policy, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let (policy, events) = policy(10, 3);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(
                |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Ok(Reply::Unavailable)
                        } else {
                            Ok(Reply::Ok)
                        }
                    }
                },
                classify,
                None,
            )
            .await;

        assert_eq!(result.unwrap(), Reply::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.retry_delays(), vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_retry_bound() {
        let (policy, events) = policy(10, 3);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<Reply, _>("connection reset".to_string()) }
                },
                classify,
                None,
            )
            .await;

        assert!(matches!(result, Err(PolicyError::Call(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let delays = events.retry_delays();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let (policy, events) = policy(10, 3);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(Reply::NotFound) }
                },
                classify,
                None,
            )
            .await;

        assert_eq!(result.unwrap(), Reply::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.retry_delays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_calling() {
        let (policy, _) = policy(5, 0);
        for _ in 0..5 {
            let _ = policy
                .execute(|_| async { Ok::<_, String>(Reply::Unavailable) }, classify, None)
                .await;
        }
        assert_eq!(policy.breaker().state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(Reply::Ok) }
                },
                classify,
                None,
            )
            .await;

        assert!(matches!(result, Err(PolicyError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opening_mid_retry_surfaces_circuit_open() {
        let (policy, _) = policy(2, 3);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(Reply::Unavailable) }
                },
                classify,
                None,
            )
            .await;

        assert!(matches!(result, Err(PolicyError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let events = Arc::new(RecordingEvents::new());
        let retries = RetryConfig {
            max_retries: 1,
            ..RetryConfig::default()
        };
        let policy = ResiliencePolicy::new(
            "upstream",
            &CircuitBreakerConfig::default(),
            &retries,
            Duration::from_millis(100),
            events.clone(),
        );

        let result = policy
            .execute(
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, String>(Reply::Ok)
                },
                classify,
                None,
            )
            .await;

        assert!(matches!(result, Err(PolicyError::Timeout(d)) if d == Duration::from_millis(100)));
        assert_eq!(events.retry_delays().len(), 1);
        assert_eq!(policy.breaker().snapshot().consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retries() {
        let (policy, events) = policy(10, 3);

        let result = policy
            .execute(
                |_| async { Ok::<_, String>(Reply::Unavailable) },
                classify,
                Some(Deadline::after(Duration::from_secs(3))),
            )
            .await;

        // One retry fits (2s), the next (4s) would overrun the deadline.
        assert_eq!(result.unwrap(), Reply::Unavailable);
        assert_eq!(events.retry_delays(), vec![Duration::from_secs(2)]);
    }
}
