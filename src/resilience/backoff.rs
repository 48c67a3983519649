//! Exponential backoff with optional jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate the delay before retry number `attempt` (1-based).
///
/// `delay = unit_ms * base^attempt`, capped at `max_ms`. With `jitter`, up to
/// 10% of the capped delay is added on top.
pub fn calculate_backoff(attempt: u32, base: u32, unit_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let factor = u64::from(base).saturating_pow(attempt);
    let delay_ms = unit_ms.saturating_mul(factor);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_range = capped_delay / 10;
    let extra = if jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(1, 2, 1000, 60_000, false), Duration::from_secs(2));
        assert_eq!(calculate_backoff(2, 2, 1000, 60_000, false), Duration::from_secs(4));
        assert_eq!(calculate_backoff(3, 2, 1000, 60_000, false), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(calculate_backoff(10, 2, 1000, 5000, false), Duration::from_secs(5));
        assert_eq!(calculate_backoff(u32::MAX, 2, 1000, 5000, false), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let d = calculate_backoff(2, 2, 100, 2000, true);
            assert!(d.as_millis() >= 400);
            assert!(d.as_millis() < 440);
        }
    }
}
