//! Tracks GitHub's per-bucket rate-limit state and gates every outbound
//! call against it. Unlike a local token bucket, this is purely
//! observation-driven: the only source of truth for how much headroom
//! remains is what GitHub's response headers report via [`RateBudget::observe`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::types::RateLimitBucket;

#[derive(Debug, Clone, Copy)]
struct BucketState {
    limit: i64,
    remaining: i64,
    reset_at: DateTime<Utc>,
}

impl BucketState {
    fn optimistic(limit: i64) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_at: Utc::now(),
        }
    }
}

/// Outcome of a [`RateBudget::reserve`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub granted: bool,
    /// How long the caller should wait before retrying, when denied.
    pub wait_hint: chrono::Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct Headroom {
    pub remaining: i64,
    pub seconds_to_reset: i64,
}

/// Per-process, cross-repository rate budget. Shared by every worker via
/// `Arc<RateBudget>`; all mutation is serialized per bucket through the
/// underlying concurrent map, mirroring `MultiKeyRateLimiter`'s per-key
/// `DashMap` shape in the reliability crate.
pub struct RateBudget {
    buckets: DashMap<RateLimitBucket, BucketState>,
    safety_reserve_fraction: f64,
    safety_reserve_min: i64,
}

impl RateBudget {
    pub fn new(safety_reserve_fraction: f64, safety_reserve_min: i64) -> Self {
        Self {
            buckets: DashMap::new(),
            safety_reserve_fraction,
            safety_reserve_min,
        }
    }

    /// Seed a bucket's state from the most recently persisted sample, so a
    /// restart does not optimistically assume a full bucket before the
    /// first live call.
    pub fn rehydrate(&self, bucket: RateLimitBucket, limit: i64, remaining: i64, reset_at: DateTime<Utc>) {
        self.buckets.insert(bucket, BucketState { limit, remaining, reset_at });
    }

    fn safety_reserve(&self, limit: i64) -> i64 {
        ((limit as f64) * self.safety_reserve_fraction)
            .round()
            .max(self.safety_reserve_min as f64) as i64
    }

    /// Returns `granted=true` iff `remaining >= n + safety_reserve`.
    ///
    /// GitHub never pushes a reset to us — the only way this budget learns
    /// a window rolled over is a subsequent [`RateBudget::observe`], which
    /// only happens after a *granted* reserve lets a real call through. Left
    /// alone, a drained bucket would therefore deny forever once `reset_at`
    /// passes, with `wait_hint` collapsing to zero and no path back to a
    /// live call that could correct it. So once `now >= reset_at`, this
    /// optimistically restores `remaining = limit` itself: the next real
    /// response's `observe` will correct it if the optimism was wrong.
    pub fn reserve(&self, bucket: RateLimitBucket, n: i64) -> Reservation {
        let now = Utc::now();
        let mut state = *self
            .buckets
            .entry(bucket)
            .or_insert_with(|| BucketState::optimistic(5000));

        if now >= state.reset_at && state.remaining < state.limit {
            state.remaining = state.limit;
            self.buckets.insert(bucket, state);
        }

        let reserve = self.safety_reserve(state.limit);
        if state.remaining >= n + reserve {
            Reservation {
                granted: true,
                wait_hint: chrono::Duration::zero(),
            }
        } else {
            let wait = (state.reset_at - now).max(chrono::Duration::zero());
            Reservation {
                granted: false,
                wait_hint: wait,
            }
        }
    }

    /// Update a bucket from a GitHub response's rate-limit headers.
    /// Monotonic in `reset_at`: an observed `remaining` higher than the
    /// local value indicates the window rolled over, so it always wins.
    pub fn observe(&self, bucket: RateLimitBucket, limit: i64, remaining: i64, reset_at: DateTime<Utc>) {
        self.buckets
            .entry(bucket)
            .and_modify(|state| {
                if remaining > state.remaining || reset_at > state.reset_at {
                    state.limit = limit;
                    state.remaining = remaining;
                    state.reset_at = reset_at;
                } else if reset_at == state.reset_at {
                    state.remaining = remaining;
                }
            })
            .or_insert(BucketState { limit, remaining, reset_at });
    }

    pub fn headroom(&self, bucket: RateLimitBucket) -> Headroom {
        let now = Utc::now();
        match self.buckets.get(&bucket) {
            Some(state) => Headroom {
                remaining: state.remaining,
                seconds_to_reset: (state.reset_at - now).num_seconds().max(0),
            },
            None => Headroom {
                remaining: 5000,
                seconds_to_reset: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_denies_below_safety_reserve() {
        let budget = RateBudget::new(0.05, 10);
        budget.observe(RateLimitBucket::Core, 5000, 10, Utc::now() + chrono::Duration::seconds(42));
        let r = budget.reserve(RateLimitBucket::Core, 1);
        assert!(!r.granted);
        assert!(r.wait_hint.num_seconds() <= 42);
    }

    #[test]
    fn reserve_grants_with_headroom() {
        let budget = RateBudget::new(0.05, 10);
        budget.observe(RateLimitBucket::Core, 5000, 4000, Utc::now() + chrono::Duration::seconds(3600));
        let r = budget.reserve(RateLimitBucket::Core, 1);
        assert!(r.granted);
    }

    #[test]
    fn observe_rolls_forward_on_reset() {
        let budget = RateBudget::new(0.05, 10);
        let reset1 = Utc::now() + chrono::Duration::seconds(10);
        budget.observe(RateLimitBucket::Search, 30, 0, reset1);
        assert!(!budget.reserve(RateLimitBucket::Search, 1).granted);

        let reset2 = Utc::now() + chrono::Duration::seconds(3600);
        budget.observe(RateLimitBucket::Search, 30, 30, reset2);
        assert!(budget.reserve(RateLimitBucket::Search, 1).granted);
    }

    #[test]
    fn reserve_rolls_forward_once_reset_has_passed_without_an_observe() {
        let budget = RateBudget::new(0.05, 10);
        // The window's reset already passed; nothing has called `observe`
        // since, so `reserve` itself must notice and restore headroom
        // rather than denying forever with a zero wait_hint.
        budget.observe(RateLimitBucket::Core, 5000, 0, Utc::now() - chrono::Duration::seconds(1));
        let r = budget.reserve(RateLimitBucket::Core, 1);
        assert!(r.granted);
    }

    #[test]
    fn rehydrate_seeds_state_before_first_observe() {
        let budget = RateBudget::new(0.05, 10);
        budget.rehydrate(RateLimitBucket::Graphql, 5000, 5, Utc::now() + chrono::Duration::seconds(60));
        assert!(!budget.reserve(RateLimitBucket::Graphql, 1).granted);
    }

    #[test]
    fn headroom_reports_remaining_and_seconds_to_reset() {
        let budget = RateBudget::new(0.05, 10);
        budget.observe(RateLimitBucket::Core, 5000, 4500, Utc::now() + chrono::Duration::seconds(120));
        let h = budget.headroom(RateLimitBucket::Core);
        assert_eq!(h.remaining, 4500);
        assert!(h.seconds_to_reset <= 120 && h.seconds_to_reset > 0);
    }
}
