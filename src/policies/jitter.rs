//! # Jitter for restart delays.
//!
//! - [`JitterPolicy::None`] : exact delay
//! - [`JitterPolicy::Full`] : uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`] : `delay/2 + uniform[0, delay/2]`

use rand::Rng;
use std::time::Duration;

/// Randomization of restart delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Use the computed delay as is.
    #[default]
    None,
    /// Uniformly random delay in `[0, delay]`.
    Full,
    /// Half of the delay plus a uniformly random share of the other half.
    Equal,
}

impl JitterPolicy {
    /// Applies the jitter to `delay` (millisecond resolution).
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return delay;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=ms - half))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn equal_keeps_at_least_half() {
        for _ in 0..100 {
            let d = JitterPolicy::Equal.apply(Duration::from_millis(3));
            assert!(d >= Duration::from_millis(1) && d <= Duration::from_millis(3));
        }
    }
}
