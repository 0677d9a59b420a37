//! Content-addressed summary cache
//!
//! Slots are keyed by a SHA-256 fingerprint of `(source_asset, title)`, so a
//! reused title is served the earlier summary even when its text changed.
//! Entries expire lazily: an entry older than its TTL reads as absent and is
//! overwritten by the next store.
//!
//! The cache never fails a run. Read errors and undecodable entries behave as
//! misses; write errors are logged and dropped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::cache as cache_constants;
use crate::storage::SharedKvStore;
use crate::types::ArticleRecord;

/// Hex-encoded SHA-256 of `"{source_asset}||{title}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(source_asset: &str, title: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_asset.as_bytes());
        hasher.update(b"||");
        hasher.update(title.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn for_record(record: &ArticleRecord) -> Self {
        Self::new(&record.source_asset, &record.title)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached summary with its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub summary: String,
    pub provider_name: String,
    pub provider_version: String,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn new(
        summary: impl Into<String>,
        provider_name: impl Into<String>,
        provider_version: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            summary: summary.into(),
            provider_name: provider_name.into(),
            provider_version: provider_version.into(),
            cached_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
        }
    }

    /// Valid while `now - cached_at <= ttl_seconds`
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.cached_at).num_seconds();
        age <= i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX)
    }
}

/// TTL cache over any [`KvStore`](crate::storage::KvStore)
#[derive(Clone)]
pub struct SummaryCache {
    store: SharedKvStore,
    ttl: Duration,
}

impl SummaryCache {
    pub fn new(store: SharedKvStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn with_default_ttl(store: SharedKvStore) -> Self {
        Self::new(store, Duration::from_secs(cache_constants::DEFAULT_TTL_SECS))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Fresh entry for `key`, if any
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let bytes = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Undecodable cache entry, treating as miss");
                return None;
            }
        };

        if entry.is_fresh_at(Utc::now()) {
            Some(entry)
        } else {
            tracing::debug!(key = %key, cached_at = %entry.cached_at, "Cache entry expired");
            None
        }
    }

    /// Write `entry` under `key`; failures are logged and ignored
    pub async fn store(&self, key: &CacheKey, entry: &CacheEntry) {
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set(key.as_str(), &bytes).await {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    /// Build a fresh entry with this cache's TTL and store it
    pub async fn store_summary(
        &self,
        key: &CacheKey,
        summary: &str,
        provider_name: &str,
        provider_version: &str,
    ) {
        let entry = CacheEntry::new(summary, provider_name, provider_version, self.ttl);
        self.store(key, &entry).await;
    }

    /// Remove every entry from the backing store
    pub async fn clear(&self) -> crate::types::Result<usize> {
        self.store.clear().await
    }
}
