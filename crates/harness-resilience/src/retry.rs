//! Retry executor.
//!
//! Runs a unit of work under an explicit [`RetryPolicy`]. The policy is a
//! plain value constructed at the call site; there is no process-wide
//! mutable default, so tests and callers are isolated by construction.

use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::backoff::{calculate_delay, BackoffStrategy};

/// Errors from the retry executor.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// The policy itself is invalid; the work was never invoked.
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),

    /// Every attempt in the budget failed with a retryable error.
    #[error("max attempts ({max_attempts}) exceeded")]
    Exhausted {
        /// The configured attempt budget.
        max_attempts: u32,
        /// The failure from the final attempt.
        #[source]
        source: E,
    },

    /// The work failed with a non-retryable error, returned unchanged.
    #[error(transparent)]
    Aborted(E),
}

impl<E> RetryError<E> {
    /// The underlying work error, if any attempt produced one.
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::InvalidPolicy(_) => None,
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Aborted(e) => Some(e),
        }
    }
}

/// Retry configuration, passed explicitly to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt. Must be >= 1.
    pub max_attempts: u32,

    /// Base delay fed into the backoff strategy.
    pub base: Duration,

    /// Hard cap on any single delay.
    pub max_delay: Duration,

    /// How the delay grows between attempts.
    pub strategy: BackoffStrategy,

    /// Random delay reduction in `[0, 1]`; 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff strategy.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the jitter fraction.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Run `work` under `policy`, retrying every failure.
///
/// Equivalent to [`retry_if`] with a predicate that treats all errors as
/// retryable.
pub fn retry<T, E, F>(policy: &RetryPolicy, work: F) -> Result<T, RetryError<E>>
where
    E: std::error::Error,
    F: FnMut() -> Result<T, E>,
{
    retry_if(policy, |_| true, work)
}

/// Run `work` under `policy`, retrying only errors `is_retryable` accepts.
///
/// A rejected error aborts immediately on its first occurrence: the
/// original value is handed back inside [`RetryError::Aborted`] with no
/// sleep and no further attempts. Success on any attempt short-circuits
/// with that attempt's result. Once the budget is spent the final error
/// is surfaced as [`RetryError::Exhausted`].
pub fn retry_if<T, E, F, P>(
    policy: &RetryPolicy,
    mut is_retryable: P,
    mut work: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error,
    F: FnMut() -> Result<T, E>,
    P: FnMut(&E) -> bool,
{
    if policy.max_attempts == 0 {
        return Err(RetryError::InvalidPolicy(
            "max_attempts must be at least 1".to_string(),
        ));
    }

    let mut attempt = 1u32;
    loop {
        match work() {
            Ok(value) => return Ok(value),
            Err(err) if !is_retryable(&err) => return Err(RetryError::Aborted(err)),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        max_attempts: policy.max_attempts,
                        source: err,
                    });
                }

                let delay = calculate_delay(
                    attempt,
                    policy.strategy,
                    policy.base,
                    policy.max_delay,
                    policy.jitter,
                );
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Error, Debug, PartialEq)]
    enum WorkError {
        #[error("transient: {0}")]
        Transient(String),

        #[error("fatal: {0}")]
        Fatal(String),
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_first_attempt_success_short_circuits() {
        let calls = Cell::new(0u32);
        let result: Result<i32, RetryError<WorkError>> = retry(&fast_policy(3), || {
            calls.set(calls.get() + 1);
            Ok(42)
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_succeeds_after_k_failures() {
        let calls = Cell::new(0u32);
        let result = retry(&fast_policy(5), || {
            calls.set(calls.get() + 1);
            if calls.get() <= 2 {
                Err(WorkError::Transient("overloaded".to_string()))
            } else {
                Ok("done")
            }
        });

        // Failed twice, succeeded on the third invocation.
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_exhaustion_names_attempt_budget() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry(&fast_policy(3), || {
            calls.set(calls.get() + 1);
            Err(WorkError::Transient("still down".to_string()))
        });

        assert_eq!(calls.get(), 3);
        match result.unwrap_err() {
            RetryError::Exhausted {
                max_attempts,
                source,
            } => {
                assert_eq!(max_attempts, 3);
                assert_eq!(source, WorkError::Transient("still down".to_string()));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_exhaustion_message_carries_count() {
        let result: Result<(), _> = retry(&fast_policy(4), || {
            Err(WorkError::Transient("nope".to_string()))
        });

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "max attempts (4) exceeded");
    }

    #[test]
    fn test_non_retryable_invoked_once_and_unchanged() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry_if(
            &fast_policy(5),
            |e| matches!(e, WorkError::Transient(_)),
            || {
                calls.set(calls.get() + 1);
                Err(WorkError::Fatal("bad credentials".to_string()))
            },
        );

        assert_eq!(calls.get(), 1);
        match result.unwrap_err() {
            RetryError::Aborted(e) => {
                assert_eq!(e, WorkError::Fatal("bad credentials".to_string()));
                assert_eq!(e.to_string(), "fatal: bad credentials");
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
    }

    #[test]
    fn test_retryable_filter_still_retries_listed_kinds() {
        let calls = Cell::new(0u32);
        let result = retry_if(
            &fast_policy(3),
            |e| matches!(e, WorkError::Transient(_)),
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 2 {
                    Err(WorkError::Transient("blip".to_string()))
                } else {
                    Ok(())
                }
            },
        );

        assert!(result.is_ok());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_zero_attempts_rejected_before_work_runs() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = retry(&fast_policy(0), || {
            calls.set(calls.get() + 1);
            Err(WorkError::Transient("unreachable".to_string()))
        });

        assert_eq!(calls.get(), 0);
        assert!(matches!(result.unwrap_err(), RetryError::InvalidPolicy(_)));
    }

    #[test]
    fn test_into_source() {
        let exhausted: RetryError<WorkError> = RetryError::Exhausted {
            max_attempts: 2,
            source: WorkError::Transient("x".to_string()),
        };
        assert!(exhausted.into_source().is_some());

        let invalid: RetryError<WorkError> = RetryError::InvalidPolicy("bad".to_string());
        assert!(invalid.into_source().is_none());
    }
}
