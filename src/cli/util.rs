//! CLI Common Utilities
//!
//! Shared initialization for command handlers: configuration plus the
//! lazily opened storage handles the cache and governor share.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::ai::metrics::SharedMetrics;
use crate::ai::provider::FallbackChain;
use crate::ai::quota::{SharedGovernor, UsageGovernor};
use crate::config::{Config, ConfigLoader};
use crate::storage::{Backends, KvNamespace};
use crate::summary::SummaryCache;
use crate::types::{ArticleRecord, Result};

/// Command execution context
///
/// Created via `CommandContext::load()`. Backing stores are opened on first
/// use so commands that only need config never touch Redis or SQLite.
pub struct CommandContext {
    /// Loaded configuration
    pub config: Config,
    backends: Backends,
}

impl CommandContext {
    /// Load merged configuration (defaults → global → project → env)
    pub fn load() -> Result<Self> {
        Ok(Self::with_config(ConfigLoader::load()?))
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            backends: Backends::new(),
        }
    }

    /// Summary cache over the configured key-value backend
    pub async fn cache(&mut self) -> Result<SummaryCache> {
        let store = self
            .backends
            .kv_store(&self.config.storage, KvNamespace::Cache)
            .await?;
        Ok(SummaryCache::new(
            store,
            Duration::from_secs(self.config.summarizer.cache_ttl_secs),
        ))
    }

    /// Usage governor over the configured quota backend
    pub async fn governor(&mut self) -> Result<SharedGovernor> {
        let governor = UsageGovernor::from_config(
            &self.config.quota,
            &self.config.storage,
            &mut self.backends,
        )
        .await?;
        Ok(Arc::new(governor))
    }

    /// Fully wired fallback chain
    pub async fn chain(&mut self, metrics: SharedMetrics) -> Result<FallbackChain> {
        let cache = self.cache().await?;
        let governor = self.governor().await?;
        FallbackChain::from_config(&self.config, governor, Some(cache), metrics)
    }
}

/// Read a JSON array of records from `path`, or stdin when `None`
pub async fn read_records(path: Option<&Path>) -> Result<Vec<ArticleRecord>> {
    let raw = match path {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

/// Write `value` as pretty JSON to `path`, or stdout when `None`
pub async fn write_json<T: serde::Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, json).await?;
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::quota::{UsageCaps, UsageDelta};
    use crate::config::{CacheBackend, QuotaBackend};
    use crate::summary::cache::CacheKey;
    use tempfile::TempDir;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.cache_backend = CacheBackend::Memory;
        config.quota.backend = QuotaBackend::Memory;
        config
    }

    #[tokio::test]
    async fn test_read_records_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.json");
        std::fs::write(
            &path,
            r#"[{"asset":"btc","title":"Rally","text":"Bitcoin rallied."}]"#,
        )
        .unwrap();

        let records = read_records(Some(&path)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_asset, "btc");
    }

    #[tokio::test]
    async fn test_read_records_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(read_records(Some(&path)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_records_rejects_non_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.json");
        std::fs::write(&path, r#"{"title":"x"}"#).unwrap();
        assert!(read_records(Some(&path)).await.is_err());
    }

    #[tokio::test]
    async fn test_write_json_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.json");
        write_json(&vec![1, 2, 3], Some(&path)).await.unwrap();
        let written: Vec<u32> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_context_builds_local_chain() {
        let mut ctx = CommandContext::with_config(memory_config());
        let metrics = crate::ai::metrics::create_shared_metrics("test");
        let chain = ctx.chain(metrics).await.unwrap();
        assert!(chain.cache().is_some());
        assert!(chain.breaker_stats().is_empty());
    }

    #[tokio::test]
    async fn test_context_governor_uses_configured_backend() {
        let mut ctx = CommandContext::with_config(memory_config());
        let governor = ctx.governor().await.unwrap();
        assert_eq!(governor.backend(), "memory");
    }

    #[tokio::test]
    async fn test_cache_clear_keeps_kv_usage_totals() {
        for backend in [CacheBackend::File, CacheBackend::Sqlite] {
            let dir = TempDir::new().unwrap();
            let mut config = Config::default();
            config.storage.cache_backend = backend;
            config.storage.cache_dir = dir.path().join("cache");
            config.storage.database_path = dir.path().join("newsgist.db");
            config.quota.backend = QuotaBackend::Kv;

            let mut ctx = CommandContext::with_config(config);
            let governor = ctx.governor().await.unwrap();
            let caps = UsageCaps {
                max_requests_per_run: 1,
                ..UsageCaps::unlimited()
            };
            let delta = UsageDelta::new(10, 1, 0.0);
            assert!(governor.reserve(&delta, &caps).await);
            assert!(!governor.reserve(&delta, &caps).await);

            let cache = ctx.cache().await.unwrap();
            let key = CacheKey::new("btc", "Rally");
            cache.store_summary(&key, "Bitcoin rallied.", "openai", "v1").await;
            assert_eq!(cache.clear().await.unwrap(), 1);
            assert!(cache.lookup(&key).await.is_none());

            assert!(!governor.reserve(&delta, &caps).await);
            assert_eq!(governor.usage().await.requests_made, 1);
        }
    }
}
