//! # harness-resilience
//!
//! Retry with configurable backoff for calls to unreliable upstreams.
//!
//! This crate is the leaf resilience primitive of the harness: it runs a
//! unit of work repeatedly under a caller-supplied [`RetryPolicy`] and
//! never decides retry policy itself. It performs no I/O of its own; the
//! only blocking is the bounded sleep between attempts.
//!
//! ## Key Guarantees
//!
//! 1. **Fail fast on bad configuration**: an invalid policy is rejected
//!    before the work is ever invoked
//! 2. **Non-retryable errors propagate unchanged**: the original error
//!    value reaches the caller untouched, so upstream logic can still
//!    branch on it
//! 3. **Bounded**: jitter only shortens a delay, and no delay ever
//!    exceeds the configured maximum
//!
//! ## Example
//!
//! ```rust,ignore
//! use harness_resilience::{retry_if, RetryPolicy};
//!
//! let policy = RetryPolicy::default().with_max_attempts(5);
//! let response = retry_if(&policy, |e: &ProviderError| e.is_transient(), || {
//!     client.complete(&request)
//! })?;
//! ```

mod backoff;
mod retry;

pub use backoff::{calculate_delay, BackoffStrategy, UnknownStrategy};
pub use retry::{retry, retry_if, RetryError, RetryPolicy};
