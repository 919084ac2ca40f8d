//! Provider health state.
//!
//! Tracks per-provider rate-limit windows, token/cost usage, and
//! arbitrary status fields, all persisted through the locked snapshot
//! store. Every read re-loads the snapshot and every write goes through
//! a locked read-modify-write cycle, so the daemon and the CLI always
//! observe each other's updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::StateError;
use crate::store::{StateMap, StateStore};

const PROVIDERS_KEY: &str = "providers";
const RATE_LIMIT_KEY: &str = "rate_limit_info";
const TOKEN_USAGE_KEY: &str = "token_usage";

/// Rate-limit window for one provider.
///
/// A provider with no record is not rate-limited. A lapsed `reset_time`
/// also means not rate-limited; records are never auto-deleted, staleness
/// is resolved when queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// When the limit is expected to lapse (RFC 3339).
    pub reset_time: String,

    /// Errors observed while the provider was limited.
    pub error_count: u64,

    /// When this record was last written (RFC 3339).
    pub last_updated: String,
}

impl RateLimitRecord {
    /// The reset time as a parsed timestamp, if it parses.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.reset_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Accumulated usage for one `"<provider>:<model>"` pair.
///
/// Every field only grows; a cleared snapshot is the one way back to
/// zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub requests: u64,
}

/// Totals across every tracked `"<provider>:<model>"` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenUsageSummary {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_requests: u64,

    /// Number of distinct provider:model pairs seen.
    pub by_provider_model: usize,
}

/// Health and usage tracking for upstream providers.
pub struct ProviderHealth {
    store: StateStore,
}

impl ProviderHealth {
    /// Create a health tracker over `store`.
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Arbitrary status fields for one provider; empty if none recorded.
    pub fn provider_state(&self, provider: &str) -> StateMap {
        object_field(&self.store.load_state(), PROVIDERS_KEY)
            .and_then(|providers| providers.get(provider))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Merge `fields` into the provider's entry.
    ///
    /// Existing keys not present in `fields` are preserved; the snapshot's
    /// top-level `last_updated` is bumped.
    pub fn update_provider_state(
        &self,
        provider: &str,
        fields: StateMap,
    ) -> Result<(), StateError> {
        let provider = provider.to_string();
        self.store
            .update_state(|doc| {
                let providers = object_entry(doc, PROVIDERS_KEY);
                let entry = object_entry(providers, &provider);
                for (key, value) in fields {
                    entry.insert(key, value);
                }
                doc.insert("last_updated".to_string(), json!(Utc::now().to_rfc3339()));
                Ok(())
            })
            .map(|_| ())
    }

    /// All recorded rate-limit windows, keyed by provider.
    pub fn rate_limit_info(&self) -> HashMap<String, RateLimitRecord> {
        object_field(&self.store.load_state(), RATE_LIMIT_KEY)
            .map(|limits| {
                limits
                    .iter()
                    .filter_map(|(provider, value)| {
                        match serde_json::from_value(value.clone()) {
                            Ok(record) => Some((provider.clone(), record)),
                            Err(error) => {
                                tracing::warn!(%provider, %error, "skipping malformed rate-limit record");
                                None
                            }
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record a rate-limit window for `provider`.
    pub fn update_rate_limit_info(
        &self,
        provider: &str,
        reset_time: DateTime<Utc>,
        error_count: u64,
    ) -> Result<(), StateError> {
        let provider = provider.to_string();
        self.store
            .update_state(|doc| {
                let record = RateLimitRecord {
                    reset_time: reset_time.to_rfc3339(),
                    error_count,
                    last_updated: Utc::now().to_rfc3339(),
                };
                let limits = object_entry(doc, RATE_LIMIT_KEY);
                limits.insert(provider, serde_json::to_value(record)?);
                Ok(())
            })
            .map(|_| ())
    }

    /// Whether `provider` is currently rate-limited.
    ///
    /// True iff a record exists and its reset time, parsed at query time,
    /// is strictly in the future. No record, a lapsed window, and an
    /// unparseable timestamp all read as not limited.
    pub fn is_rate_limited(&self, provider: &str) -> bool {
        self.rate_limit_info()
            .get(provider)
            .and_then(RateLimitRecord::reset_at)
            .is_some_and(|reset_at| reset_at > Utc::now())
    }

    /// The earliest recorded reset time across all providers.
    ///
    /// Lapsed windows are still included; choosing the earliest-resolving
    /// lock-out is the caller's concern. `None` when no provider has a
    /// parseable reset time.
    pub fn next_provider_reset_time(&self) -> Option<DateTime<Utc>> {
        self.rate_limit_info()
            .values()
            .filter_map(RateLimitRecord::reset_at)
            .min()
    }

    /// Accumulate one call's tokens and cost for `provider`/`model`.
    pub fn record_token_usage(
        &self,
        provider: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) -> Result<(), StateError> {
        let key = format!("{provider}:{model}");
        self.store
            .update_state(|doc| {
                let usage = object_entry(doc, TOKEN_USAGE_KEY);
                let mut record: TokenUsageRecord = usage
                    .get(&key)
                    .and_then(|value| serde_json::from_value(value.clone()).ok())
                    .unwrap_or_default();

                record.input_tokens += input_tokens;
                record.output_tokens += output_tokens;
                record.total_tokens += input_tokens + output_tokens;
                record.cost += cost;
                record.requests += 1;

                usage.insert(key, serde_json::to_value(record)?);
                Ok(())
            })
            .map(|_| ())
    }

    /// Per-key usage records.
    pub fn token_usage(&self) -> HashMap<String, TokenUsageRecord> {
        object_field(&self.store.load_state(), TOKEN_USAGE_KEY)
            .map(|usage| {
                usage
                    .iter()
                    .filter_map(|(key, value)| match serde_json::from_value(value.clone()) {
                        Ok(record) => Some((key.clone(), record)),
                        Err(error) => {
                            tracing::warn!(%key, %error, "skipping malformed token-usage record");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Totals across every usage record.
    pub fn token_usage_summary(&self) -> TokenUsageSummary {
        let usage = self.token_usage();
        let mut summary = TokenUsageSummary {
            by_provider_model: usage.len(),
            ..TokenUsageSummary::default()
        };
        for record in usage.values() {
            summary.total_tokens += record.total_tokens;
            summary.total_cost += record.cost;
            summary.total_requests += record.requests;
        }
        summary
    }
}

/// Borrow a nested object field, if present and an object.
fn object_field<'a>(doc: &'a StateMap, key: &str) -> Option<&'a StateMap> {
    doc.get(key).and_then(Value::as_object)
}

/// Get or insert a nested object field, replacing any non-object value.
fn object_entry<'a>(doc: &'a mut StateMap, key: &str) -> &'a mut StateMap {
    if !doc.get(key).is_some_and(Value::is_object) {
        doc.insert(key.to_string(), Value::Object(StateMap::new()));
    }
    doc.get_mut(key)
        .and_then(Value::as_object_mut)
        .unwrap_or_else(|| unreachable!("entry was just inserted as an object"))
}
