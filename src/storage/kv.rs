//! Key-Value Storage Abstraction
//!
//! A minimal async `get`/`set` contract shared by every backing store. The
//! summary cache and the best-effort usage governor are written against this
//! trait only; backends are chosen from configuration.
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | memory | [`MemoryStore`] | process-local, lost on exit |
//! | file | [`FileStore`] | one JSON file per key |
//! | sqlite | [`SqliteStore`](super::SqliteStore) | `kv_store` table |
//! | redis | [`RedisStore`](super::RedisStore) | networked, prefixed keys |
//!
//! Every store is opened for one [`KvNamespace`]. Stores in different
//! namespaces never see, or clear, each other's entries.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::types::Result;

/// Disjoint key spaces sharing one configured backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KvNamespace {
    /// Summary cache entries, removed by `cache clear`
    Cache,
    /// Best-effort usage totals
    Quota,
}

impl KvNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Quota => "quota",
        }
    }
}

impl std::fmt::Display for KvNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Async key-value store over raw bytes
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend identifier for logs
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove every entry owned by this store, returning how many were removed
    async fn clear(&self) -> Result<usize>;
}

pub type SharedKvStore = Arc<dyn KvStore>;

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let count = self.entries.len();
        self.entries.clear();
        Ok(count)
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Distinguishes temp files of concurrent writers in this process
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One `<key>.json` file per entry under a directory.
///
/// Only regular `*.json` files directly in the directory belong to the store,
/// so another namespace can live in a subdirectory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(key)))
    }

    /// Unique per writer, so concurrent sets of one key never share a temp file
    fn tmp_path_for(&self, key: &str) -> PathBuf {
        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}.{}.tmp",
            sanitize(key),
            std::process::id(),
            seq
        ))
    }
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl KvStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so readers never observe a partial file
        let path = self.path_for(key);
        let tmp = self.tmp_path_for(key);
        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(key, bytes = value.len(), "Wrote file store entry");
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file()
                && path.extension().is_some_and(|ext| ext == "json")
            {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_get_set() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", b"v1").await.unwrap();
        store.set("k", b"v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.len(), 1);

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("cache"));

        assert_eq!(store.get("abc").await.unwrap(), None);
        store.set("abc", br#"{"summary":"x"}"#).await.unwrap();
        assert_eq!(
            store.get("abc").await.unwrap(),
            Some(br#"{"summary":"x"}"#.to_vec())
        );
        assert!(dir.path().join("cache").join("abc.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_sanitizes_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.set("../escape/key", b"v").await.unwrap();
        assert!(dir.path().join("___escape_key.json").exists());
        assert_eq!(store.get("../escape/key").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_file_store_clear() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("cache"));

        assert_eq!(store.clear().await.unwrap(), 0);

        store.set("a", b"1").await.unwrap();
        store.set("b", b"2").await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_clear_leaves_subdirectories() {
        let dir = TempDir::new().unwrap();
        let cache = FileStore::new(dir.path());
        let quota = FileStore::new(dir.path().join("quota"));

        cache.set("entry", b"1").await.unwrap();
        quota.set("usage", b"2").await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(quota.get("usage").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_writes_same_key() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path()));

        let writers: Vec<_> = (0..16u8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set("shared", &[i; 64]).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let value = store.get("shared").await.unwrap().unwrap();
        assert_eq!(value.len(), 64);
        assert!(value.iter().all(|b| *b == value[0]));

        // No temp files left behind
        let mut entries = std::fs::read_dir(dir.path()).unwrap();
        assert!(entries.all(|e| e.unwrap().path().extension().is_some_and(|x| x == "json")));
    }
}
