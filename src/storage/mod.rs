//! Storage Backends
//!
//! Key-value stores for the summary cache and the SQLite database that also
//! holds shared usage totals.

pub mod database;
pub mod kv;
pub mod redis_store;

pub use database::{Database, SharedDatabase, SqliteStore};
pub use kv::{FileStore, KvNamespace, KvStore, MemoryStore, SharedKvStore};
pub use redis_store::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use crate::ai::timeout::with_timeout;
use crate::config::{CacheBackend, StorageConfig};
use crate::constants::provider;
use crate::types::{GistError, Result};

/// Lazily opened handles shared between the cache and the usage governor
#[derive(Default)]
pub struct Backends {
    database: Option<SharedDatabase>,
    redis: Option<redis::aio::ConnectionManager>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (once) the configured SQLite database
    pub fn database(&mut self, config: &StorageConfig) -> Result<SharedDatabase> {
        if let Some(db) = &self.database {
            return Ok(Arc::clone(db));
        }
        let db = Arc::new(Database::open(&config.database_path)?);
        self.database = Some(Arc::clone(&db));
        Ok(db)
    }

    /// Connect (once) to the configured Redis server
    pub async fn redis(
        &mut self,
        config: &StorageConfig,
    ) -> Result<redis::aio::ConnectionManager> {
        if let Some(conn) = &self.redis {
            return Ok(conn.clone());
        }
        let url = config
            .redis_url
            .as_deref()
            .ok_or_else(|| GistError::Config("storage.redis_url is not set".to_string()))?;
        let conn = with_timeout(
            Duration::from_secs(provider::CONNECTION_TIMEOUT_SECS),
            redis_store::connect(url),
            "redis connect",
        )
        .await?;
        self.redis = Some(conn.clone());
        Ok(conn)
    }

    /// Build a store for `namespace` on the backend selected by
    /// `storage.cache_backend`.
    ///
    /// File stores keep non-cache namespaces in a subdirectory of `cache_dir`,
    /// which `clear` on the cache namespace never descends into.
    pub async fn kv_store(
        &mut self,
        config: &StorageConfig,
        namespace: KvNamespace,
    ) -> Result<SharedKvStore> {
        let store: SharedKvStore = match config.cache_backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::File => Arc::new(FileStore::new(match namespace {
                KvNamespace::Cache => config.cache_dir.clone(),
                other => config.cache_dir.join(other.as_str()),
            })),
            CacheBackend::Sqlite => Arc::new(SqliteStore::new(self.database(config)?, namespace)),
            CacheBackend::Redis => {
                Arc::new(RedisStore::new(self.redis(config).await?, namespace))
            }
        };
        tracing::debug!(backend = store.backend(), %namespace, "Opened key-value store");
        Ok(store)
    }
}
