//! Backoff delay computation.
//!
//! A delay is derived from the attempt number and a strategy, capped at a
//! maximum, then optionally shortened by random jitter to avoid
//! synchronized retry storms across processes.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// How the delay grows with the attempt number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,

    /// `base * attempt`
    Linear,

    /// `base` on every attempt
    Constant,
}

/// Error for a strategy identifier that names no known strategy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for BackoffStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exponential" => Ok(Self::Exponential),
            "linear" => Ok(Self::Linear),
            "constant" => Ok(Self::Constant),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Compute the delay before the next attempt.
///
/// `attempt` is 1-based (the delay after the first failure uses
/// `attempt = 1`). The strategy result is capped at `max_delay`, then
/// `jitter` (clamped to `[0, 1]`) shortens the capped value by a uniform
/// random fraction in `[0, jitter]`. Jitter never lengthens a delay, and
/// `jitter = 0` returns the capped value exactly.
pub fn calculate_delay(
    attempt: u32,
    strategy: BackoffStrategy,
    base: Duration,
    max_delay: Duration,
    jitter: f64,
) -> Duration {
    let attempt = attempt.max(1);

    let raw = match strategy {
        BackoffStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Constant => base,
    };

    let capped = raw.min(max_delay);

    if jitter <= 0.0 {
        return capped;
    }

    let jitter = jitter.min(1.0);
    let cut: f64 = rand::rng().random_range(0.0..=jitter);
    capped.mul_f64(1.0 - cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SEC: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(3600);

    #[test]
    fn test_exponential_doubles_per_attempt() {
        let delays: Vec<_> = (1..=5)
            .map(|n| calculate_delay(n, BackoffStrategy::Exponential, SEC, MAX, 0.0))
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
    }

    #[test]
    fn test_linear_grows_by_base() {
        let delays: Vec<_> = (1..=3)
            .map(|n| calculate_delay(n, BackoffStrategy::Linear, SEC, MAX, 0.0))
            .collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ]
        );
    }

    #[test]
    fn test_constant_never_grows() {
        for n in 1..=10 {
            assert_eq!(
                calculate_delay(n, BackoffStrategy::Constant, SEC, MAX, 0.0),
                SEC
            );
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let max = Duration::from_secs(10);
        let delay = calculate_delay(20, BackoffStrategy::Exponential, SEC, max, 0.0);
        assert_eq!(delay, max);
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let a = calculate_delay(4, BackoffStrategy::Exponential, SEC, MAX, 0.0);
        let b = calculate_delay(4, BackoffStrategy::Exponential, SEC, MAX, 0.0);
        assert_eq!(a, b);
        assert_eq!(a, Duration::from_secs(8));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "exponential".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Exponential
        );
        assert_eq!(
            "linear".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Linear
        );
        assert_eq!(
            "constant".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Constant
        );

        let err = "fibonacci".parse::<BackoffStrategy>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown strategy: fibonacci");
    }

    proptest! {
        #[test]
        fn prop_jitter_only_shortens(attempt in 1u32..16, jitter in 0.0f64..=1.0) {
            let capped = calculate_delay(attempt, BackoffStrategy::Exponential, SEC, MAX, 0.0);
            let jittered = calculate_delay(attempt, BackoffStrategy::Exponential, SEC, MAX, jitter);
            prop_assert!(jittered <= capped);
        }

        #[test]
        fn prop_never_exceeds_max(attempt in 1u32..64, max_secs in 1u64..120) {
            let max = Duration::from_secs(max_secs);
            let delay = calculate_delay(attempt, BackoffStrategy::Exponential, SEC, max, 0.0);
            prop_assert!(delay <= max);
        }
    }
}
