//! Exponential backoff with jitter for transient-error retries. Base 2s,
//! capped at 60s, jitter of ±20% to avoid thundering-herd retries across
//! concurrently failing actions.

use std::time::Duration;

use rand::Rng;

/// Backoff duration before retrying `attempt` (1-indexed: the delay
/// before the *next* attempt after `attempt` has failed).
pub fn backoff_for_attempt(attempt: i64, base_seconds: u64, cap_seconds: u64) -> Duration {
    let exponent = (attempt.max(1) - 1) as u32;
    let base_ms = base_seconds as f64 * 1000.0;
    let uncapped = base_ms * 2f64.powi(exponent as i32);
    let capped = uncapped.min(cap_seconds as f64 * 1000.0);

    let mut rng = rand::thread_rng();
    let jitter = rng.gen_range(0.8..=1.2);
    Duration::from_millis((capped * jitter).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_roughly_base() {
        let d = backoff_for_attempt(1, 2, 60);
        assert!(d.as_millis() >= 1600 && d.as_millis() <= 2400, "{d:?}");
    }

    #[test]
    fn backoff_doubles_each_attempt_before_cap() {
        let first = backoff_for_attempt(1, 2, 60).as_millis() as f64;
        let second = backoff_for_attempt(2, 2, 60).as_millis() as f64;
        assert!(second > first * 1.4, "expected roughly doubling: {first} -> {second}");
    }

    #[test]
    fn backoff_never_exceeds_jittered_cap() {
        for attempt in 1..10 {
            let d = backoff_for_attempt(attempt, 2, 60);
            assert!(d.as_millis() <= (60_000.0 * 1.2) as u128, "attempt {attempt}: {d:?}");
        }
    }
}
