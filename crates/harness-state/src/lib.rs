//! # harness-state
//!
//! Durable runtime state for the aidp harness: provider health,
//! rate-limit windows, token/cost accounting, and operational metrics,
//! persisted as one JSON snapshot per (project, mode) pair under
//! `<project>/.aidp/harness/`.
//!
//! The snapshot is shared by independent processes (the interactive CLI
//! and the detached daemon), so the [`StateStore`] is the single arbiter
//! of on-disk consistency: writers serialize through an advisory lock
//! file and replace the whole document atomically, readers re-parse the
//! file on every call and never block.
//!
//! ## Key Guarantees
//!
//! 1. **Reads never fail**: an absent or corrupt snapshot is an empty
//!    mapping, with a warning for the corrupt case
//! 2. **Writes never leak locks**: the lock file is gone after every
//!    save, successful or not; a contended lock fails with a timeout
//!    error instead of blocking forever
//! 3. **Accumulators only grow**: token usage and event counters never
//!    decrease except through an explicit clear
//!
//! ## Example
//!
//! ```rust,ignore
//! use harness_state::{MetricsEngine, ProviderHealth, StateStore};
//!
//! let store = StateStore::new(project_dir, "execute");
//! let health = ProviderHealth::new(store.clone());
//! health.record_token_usage("anthropic", "claude-3", 100, 200, 0.01)?;
//!
//! let metrics = MetricsEngine::new(store);
//! metrics.record_provider_switch("anthropic", "cursor")?;
//! if health.is_rate_limited("anthropic") {
//!     // pick another provider
//! }
//! ```

pub mod error;
pub mod health;
pub mod metrics;
pub mod store;

// Re-export main types at crate root
pub use error::StateError;
pub use health::{ProviderHealth, RateLimitRecord, TokenUsageRecord, TokenUsageSummary};
pub use metrics::{HarnessMetrics, MetricsEngine, PerformanceMetrics, WorkflowStats};
pub use store::{LockOptions, StateMap, StateStore, ENV_LOCK_POLL_INTERVAL, ENV_LOCK_TIMEOUT};
