//! Harness metrics.
//!
//! Records discrete operational events (provider switches, rate-limit
//! hits, retries, errors, feedback requests) into the shared snapshot and
//! derives efficiency/reliability/performance ratios from them. The
//! ratios drive operational decisions upstream, so their formulas and
//! zero-denominator defaults are contracts, not incidental behavior.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::StateError;
use crate::store::{StateMap, StateStore};

const SECS_PER_HOUR: f64 = 3600.0;

/// The seam to the workflow-state collaborator that owns step progress.
pub trait WorkflowStats {
    /// Steps completed so far in the current session.
    fn completed_steps_count(&self) -> u64;

    /// Session duration in seconds.
    fn session_duration(&self) -> f64;
}

/// The raw counters plus current harness status from the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HarnessMetrics {
    pub provider_switches: u64,
    pub rate_limit_events: u64,
    pub user_feedback_requests: u64,
    pub error_events: u64,
    pub retry_attempts: u64,
    pub current_provider: Option<String>,
    pub harness_state: Option<String>,
    pub last_activity: Option<String>,
}

/// Derived ratios over the counters and the workflow's step progress.
///
/// Every ratio is rounded to 2 decimal places. Each zero-denominator
/// default is 0.0 except `success_rate`, which defaults to 100.0: no
/// attempts yet means nothing has failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub completed_steps: u64,
    pub session_duration: f64,
    pub provider_switches: u64,
    pub retry_attempts: u64,
    pub user_feedback_requests: u64,
    pub error_events: u64,
    pub rate_limit_events: u64,
    pub provider_switches_per_step: f64,
    pub average_retries_per_step: f64,
    pub user_feedback_ratio: f64,
    /// Percentage of attempts that errored.
    pub error_rate: f64,
    /// Rate-limit hits per hour of session time.
    pub rate_limit_frequency: f64,
    /// Percentage of attempts that completed.
    pub success_rate: f64,
    pub steps_per_hour: f64,
    /// Seconds per completed step.
    pub average_step_duration: f64,
}

/// Event recording and metric derivation over the shared snapshot.
pub struct MetricsEngine {
    store: StateStore,
}

impl MetricsEngine {
    /// Create a metrics engine over `store`.
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Record a switch from one provider to another.
    pub fn record_provider_switch(&self, from: &str, to: &str) -> Result<(), StateError> {
        let mut detail = StateMap::new();
        detail.insert("from".to_string(), json!(from));
        detail.insert("to".to_string(), json!(to));
        self.record_event("provider_switches", "last_provider_switch", detail)
    }

    /// Record a rate-limit hit for `provider`.
    pub fn record_rate_limit_event(
        &self,
        provider: &str,
        reset_time: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut detail = StateMap::new();
        detail.insert("provider".to_string(), json!(provider));
        detail.insert("reset_time".to_string(), json!(reset_time.to_rfc3339()));
        self.record_event("rate_limit_events", "last_rate_limit", detail)
    }

    /// Record that the harness paused to ask the user questions.
    pub fn record_user_feedback_request(
        &self,
        step: &str,
        questions_count: u64,
    ) -> Result<(), StateError> {
        let mut detail = StateMap::new();
        detail.insert("step".to_string(), json!(step));
        detail.insert("questions_count".to_string(), json!(questions_count));
        self.record_event("user_feedback_requests", "last_feedback_request", detail)
    }

    /// Record an error during a step; `provider` when one was involved.
    pub fn record_error_event(
        &self,
        step: &str,
        error_type: &str,
        provider: Option<&str>,
    ) -> Result<(), StateError> {
        let mut detail = StateMap::new();
        detail.insert("step".to_string(), json!(step));
        detail.insert("error_type".to_string(), json!(error_type));
        if let Some(provider) = provider {
            detail.insert("provider".to_string(), json!(provider));
        }
        self.record_event("error_events", "last_error", detail)
    }

    /// Record one retry attempt against `provider` during a step.
    pub fn record_retry_attempt(
        &self,
        step: &str,
        provider: &str,
        attempt: u32,
    ) -> Result<(), StateError> {
        let mut detail = StateMap::new();
        detail.insert("step".to_string(), json!(step));
        detail.insert("provider".to_string(), json!(provider));
        detail.insert("attempt".to_string(), json!(attempt));
        self.record_event("retry_attempts", "last_retry", detail)
    }

    /// Bump `counter` and overwrite `last_key` with the event detail.
    ///
    /// The five recorders are independent; no cross-kind ordering is
    /// implied, and only the single most recent event per kind is kept.
    fn record_event(
        &self,
        counter: &str,
        last_key: &str,
        mut detail: StateMap,
    ) -> Result<(), StateError> {
        self.store
            .update_state(|doc| {
                let count = doc.get(counter).and_then(Value::as_u64).unwrap_or(0);
                doc.insert(counter.to_string(), json!(count + 1));
                detail.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
                doc.insert(last_key.to_string(), Value::Object(detail));
                Ok(())
            })
            .map(|_| ())
    }

    /// The five counters plus harness status from the snapshot.
    ///
    /// Absent counters read as 0 and absent status fields as `None`, so
    /// an empty snapshot yields a well-formed all-default result.
    pub fn harness_metrics(&self) -> HarnessMetrics {
        let doc = self.store.load_state();
        HarnessMetrics {
            provider_switches: counter(&doc, "provider_switches"),
            rate_limit_events: counter(&doc, "rate_limit_events"),
            user_feedback_requests: counter(&doc, "user_feedback_requests"),
            error_events: counter(&doc, "error_events"),
            retry_attempts: counter(&doc, "retry_attempts"),
            current_provider: string_field(&doc, "current_provider"),
            harness_state: string_field(&doc, "harness_state"),
            last_activity: string_field(&doc, "last_activity"),
        }
    }

    /// Derive performance ratios from the counters and `workflow`.
    pub fn performance_metrics(&self, workflow: &dyn WorkflowStats) -> PerformanceMetrics {
        let metrics = self.harness_metrics();
        let steps = workflow.completed_steps_count();
        let duration = workflow.session_duration();
        let hours = duration / SECS_PER_HOUR;
        let errors = metrics.error_events;
        let attempts = steps + errors;

        PerformanceMetrics {
            completed_steps: steps,
            session_duration: duration,
            provider_switches: metrics.provider_switches,
            retry_attempts: metrics.retry_attempts,
            user_feedback_requests: metrics.user_feedback_requests,
            error_events: errors,
            rate_limit_events: metrics.rate_limit_events,
            provider_switches_per_step: per_step(metrics.provider_switches, steps),
            average_retries_per_step: per_step(metrics.retry_attempts, steps),
            user_feedback_ratio: per_step(metrics.user_feedback_requests, steps),
            error_rate: percentage(errors, attempts, 0.0),
            rate_limit_frequency: per_hour(metrics.rate_limit_events as f64, hours),
            // No attempts yet means nothing has failed: assume success.
            success_rate: percentage(steps, attempts, 100.0),
            steps_per_hour: per_hour(steps as f64, hours),
            average_step_duration: if steps == 0 {
                0.0
            } else {
                round2(duration / steps as f64)
            },
        }
    }
}

fn counter(doc: &StateMap, key: &str) -> u64 {
    doc.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn string_field(doc: &StateMap, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn per_step(count: u64, steps: u64) -> f64 {
    if steps == 0 {
        0.0
    } else {
        round2(count as f64 / steps as f64)
    }
}

fn per_hour(count: f64, hours: f64) -> f64 {
    if hours <= 0.0 {
        0.0
    } else {
        round2(count / hours)
    }
}

fn percentage(numerator: u64, denominator: u64, when_empty: f64) -> f64 {
    if denominator == 0 {
        when_empty
    } else {
        round2(numerator as f64 / denominator as f64 * 100.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
