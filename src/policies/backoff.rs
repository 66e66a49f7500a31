//! # Backoff before restarting a crashed worker.
//!
//! [`BackoffPolicy`] maps the number of restarts a handle has already gone
//! through to the delay slept before the next one:
//! `first × factor^restarts`, capped at `max`, then jittered.
//!
//! The base is recomputed from the restart count every time, so a jittered
//! value never feeds into the next delay.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(250),
//!     max: Duration::from_secs(5),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(250));
//! assert_eq!(backoff.next(2), Duration::from_secs(1));
//! assert_eq!(backoff.next(9), Duration::from_secs(5));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart delay policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor per consecutive restart (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `factor = 2.0`, `max = 10s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// A constant delay between restarts.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay before restart number `restarts` (0-based).
    ///
    /// Overflowing, negative or non-finite intermediate values collapse to `max`.
    pub fn next(&self, restarts: u32) -> Duration {
        let exp = restarts.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter,
        }
    }

    #[test]
    fn first_restart_uses_first_delay() {
        let p = policy(100, 30_000, 2.0, JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_millis(100));
    }

    #[test]
    fn grows_exponentially_until_capped() {
        let p = policy(100, 1_000, 2.0, JitterPolicy::None);
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_millis(1_000));
        assert_eq!(p.next(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn first_larger_than_max_is_capped() {
        let p = policy(10_000, 5_000, 2.0, JitterPolicy::None);
        assert_eq!(p.next(0), Duration::from_millis(5_000));
    }

    #[test]
    fn constant_policy_never_changes() {
        let p = BackoffPolicy::constant(Duration::from_millis(300));
        for restarts in 0..20 {
            assert_eq!(p.next(restarts), Duration::from_millis(300));
        }
    }

    #[test]
    fn jittered_delays_stay_within_base() {
        let full = policy(1_000, 30_000, 1.0, JitterPolicy::Full);
        let equal = policy(1_000, 30_000, 1.0, JitterPolicy::Equal);
        for restarts in 0..50 {
            assert!(full.next(restarts) <= Duration::from_millis(1_000));
            let d = equal.next(restarts);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_000));
        }
    }
}
