//! Usage Governor for Metered Providers
//!
//! Tracks cumulative token, request and dollar usage for a metered provider
//! and admits or rejects proposed increments against per-run caps.
//!
//! ## Consistency Tiers
//!
//! | Store | Tier | Mechanism |
//! |-------|------|-----------|
//! | [`LocalQuotaStore`] | atomic | mutex-guarded state |
//! | [`SqliteQuotaStore`] | atomic | `BEGIN IMMEDIATE` read-check-write |
//! | [`RedisQuotaStore`] | atomic | single Lua script |
//! | [`KvQuotaStore`] | best-effort | optimistic get/set loop |
//!
//! Best-effort stores can overshoot a cap by at most the sum of deltas that
//! were in flight concurrently. Atomic stores never exceed a cap.
//!
//! ## Failure Policy
//!
//! The governor fails closed: any store error during `reserve`, or a store
//! that does not answer within the reservation timeout, means "not admitted".
//! Reading usage fails open to a zero state.
//!
//! A timed-out reservation may still land in the store afterwards. That
//! over-counts usage but never admits a call the caps would refuse.

mod stores;

pub use stores::{KvQuotaStore, LocalQuotaStore, RedisQuotaStore, SqliteQuotaStore};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{QuotaBackend, QuotaConfig, StorageConfig};
use crate::storage::{Backends, KvNamespace};
use crate::constants::quota as quota_constants;
use crate::types::Result;

// =============================================================================
// Usage Types
// =============================================================================

/// Running usage totals for one metered provider.
///
/// Dollars are held as integer micro-dollars so they can be incremented with
/// integer primitives (`HINCRBY`, SQL integer columns, atomics).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageState {
    pub tokens_used: u64,
    pub requests_made: u64,
    pub usd_micros: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UsageState {
    /// Dollars spent, derived from micro-dollars
    pub fn usd_spent(&self) -> f64 {
        self.usd_micros as f64 / quota_constants::MICROS_PER_USD
    }

    /// Whether adding `delta` keeps every capped dimension within its cap
    pub fn admits(&self, delta: &UsageDelta, caps: &UsageCaps) -> bool {
        within(self.tokens_used, delta.tokens, caps.max_tokens_per_run)
            && within(self.requests_made, delta.requests, caps.max_requests_per_run)
            && within(self.usd_micros, delta.usd_micros, caps.max_usd_micros)
    }

    /// Apply an admitted increment
    pub fn apply(&mut self, delta: &UsageDelta) {
        self.tokens_used = self.tokens_used.saturating_add(delta.tokens);
        self.requests_made = self.requests_made.saturating_add(delta.requests);
        self.usd_micros = self.usd_micros.saturating_add(delta.usd_micros);
        self.updated_at = Some(Utc::now());
    }

    /// Highest utilisation across capped dimensions (0.0 when uncapped)
    pub fn utilization(&self, caps: &UsageCaps) -> f64 {
        [
            (self.tokens_used, caps.max_tokens_per_run),
            (self.requests_made, caps.max_requests_per_run),
            (self.usd_micros, caps.max_usd_micros),
        ]
        .into_iter()
        .filter(|(_, cap)| *cap > 0)
        .map(|(used, cap)| used as f64 / cap as f64)
        .fold(0.0, f64::max)
    }
}

fn within(used: u64, delta: u64, cap: u64) -> bool {
    cap == 0 || used.saturating_add(delta) <= cap
}

/// Per-run caps. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCaps {
    pub max_tokens_per_run: u64,
    pub max_requests_per_run: u64,
    pub max_usd_micros: u64,
}

impl UsageCaps {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self {
            max_tokens_per_run: config.max_tokens_per_run,
            max_requests_per_run: config.max_requests_per_run,
            max_usd_micros: usd_to_micros(config.max_usd_per_run),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_tokens_per_run == 0 && self.max_requests_per_run == 0 && self.max_usd_micros == 0
    }
}

/// A proposed usage increment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub tokens: u64,
    pub requests: u64,
    pub usd_micros: u64,
}

impl UsageDelta {
    pub fn new(tokens: u64, requests: u64, usd: f64) -> Self {
        Self {
            tokens,
            requests,
            usd_micros: usd_to_micros(usd),
        }
    }

    pub fn usd(&self) -> f64 {
        self.usd_micros as f64 / quota_constants::MICROS_PER_USD
    }
}

/// Round up so estimated spend is never under-counted
fn usd_to_micros(usd: f64) -> u64 {
    if usd <= 0.0 || !usd.is_finite() {
        0
    } else {
        (usd * quota_constants::MICROS_PER_USD).ceil() as u64
    }
}

/// Rough token estimate: one token per four characters, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count();
    chars.div_ceil(crate::constants::provider::CHARS_PER_TOKEN) as u64
}

// =============================================================================
// Quota Store
// =============================================================================

/// Race guarantees a quota store provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyTier {
    /// Check and increment happen as one indivisible step
    Atomic,
    /// Read, check, write; concurrent writers may overshoot
    BestEffort,
}

impl std::fmt::Display for ConsistencyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Backing store for usage totals
#[async_trait]
pub trait QuotaStore: Send + Sync {
    fn tier(&self) -> ConsistencyTier;

    fn backend(&self) -> &'static str;

    /// Apply `delta` if it fits within `caps`.
    ///
    /// Returns the new totals when admitted, `None` when a cap would be
    /// exceeded. An admitted increment is already applied on return.
    async fn try_reserve(&self, delta: &UsageDelta, caps: &UsageCaps)
    -> Result<Option<UsageState>>;

    async fn usage(&self) -> Result<UsageState>;
}

pub type SharedQuotaStore = Arc<dyn QuotaStore>;

// =============================================================================
// Usage Governor
// =============================================================================

/// Admits metered usage against caps, failing closed on store errors
pub struct UsageGovernor {
    store: SharedQuotaStore,
    reserve_timeout: Duration,
    warning_threshold: f64,
    critical_threshold: f64,
    warning_emitted: AtomicBool,
    critical_emitted: AtomicBool,
}

pub type SharedGovernor = Arc<UsageGovernor>;

impl UsageGovernor {
    pub fn new(store: SharedQuotaStore) -> Self {
        Self {
            store,
            reserve_timeout: Duration::from_secs(quota_constants::RESERVE_TIMEOUT_SECS),
            warning_threshold: quota_constants::WARNING_THRESHOLD,
            critical_threshold: quota_constants::CRITICAL_THRESHOLD,
            warning_emitted: AtomicBool::new(false),
            critical_emitted: AtomicBool::new(false),
        }
    }

    /// Governor over the store selected by `quota.backend`.
    ///
    /// Store handles are shared with the cache through `backends`.
    pub async fn from_config(
        quota: &QuotaConfig,
        storage: &StorageConfig,
        backends: &mut Backends,
    ) -> Result<Self> {
        let key = quota.usage_key.as_str();
        let store: SharedQuotaStore = match quota.backend {
            QuotaBackend::Memory => Arc::new(LocalQuotaStore::new()),
            QuotaBackend::Sqlite => Arc::new(SqliteQuotaStore::new(backends.database(storage)?, key)),
            QuotaBackend::Redis => {
                Arc::new(RedisQuotaStore::new(backends.redis(storage).await?, key))
            }
            QuotaBackend::Kv => Arc::new(KvQuotaStore::new(
                backends.kv_store(storage, KvNamespace::Quota).await?,
                key,
            )),
        };

        tracing::info!(
            backend = store.backend(),
            tier = %store.tier(),
            key,
            "Usage governor ready"
        );
        Ok(Self::new(store))
    }

    pub fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    pub fn reserve_timeout(&self) -> Duration {
        self.reserve_timeout
    }

    /// In-process governor, mostly for tests and single-run tools
    pub fn in_memory() -> Self {
        Self::new(Arc::new(LocalQuotaStore::new()))
    }

    pub fn tier(&self) -> ConsistencyTier {
        self.store.tier()
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Atomically admit or reject `delta`.
    ///
    /// `true` means the increment has been durably applied.
    pub async fn reserve(&self, delta: &UsageDelta, caps: &UsageCaps) -> bool {
        let reservation =
            tokio::time::timeout(self.reserve_timeout, self.store.try_reserve(delta, caps)).await;
        let Ok(result) = reservation else {
            tracing::warn!(
                backend = self.store.backend(),
                timeout_ms = self.reserve_timeout.as_millis() as u64,
                "Usage store did not answer in time, not admitting"
            );
            return false;
        };

        match result {
            Ok(Some(state)) => {
                tracing::debug!(
                    tokens = delta.tokens,
                    requests = delta.requests,
                    usd = delta.usd(),
                    total_tokens = state.tokens_used,
                    total_requests = state.requests_made,
                    "Usage reserved"
                );
                self.check_thresholds(&state, caps);
                true
            }
            Ok(None) => {
                tracing::info!(
                    tokens = delta.tokens,
                    requests = delta.requests,
                    usd = delta.usd(),
                    "Usage reservation rejected: cap would be exceeded"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.store.backend(),
                    error = %e,
                    "Usage store failed during reservation, not admitting"
                );
                false
            }
        }
    }

    /// Current totals; zero on store failure
    pub async fn usage(&self) -> UsageState {
        match self.store.usage().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    backend = self.store.backend(),
                    error = %e,
                    "Failed to read usage totals"
                );
                UsageState::default()
            }
        }
    }

    fn check_thresholds(&self, state: &UsageState, caps: &UsageCaps) {
        let util = state.utilization(caps);
        if util >= self.critical_threshold && !self.critical_emitted.swap(true, Ordering::Relaxed)
        {
            tracing::error!(
                tokens = state.tokens_used,
                requests = state.requests_made,
                usd = state.usd_spent(),
                utilization = util,
                "CRITICAL: Usage at critical threshold"
            );
        } else if util >= self.warning_threshold
            && !self.warning_emitted.swap(true, Ordering::Relaxed)
        {
            tracing::warn!(
                tokens = state.tokens_used,
                requests = state.requests_made,
                usd = state.usd_spent(),
                utilization = util,
                "Usage approaching cap"
            );
        }
    }
}
