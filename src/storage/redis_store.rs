//! Redis-backed key-value store
//!
//! Shared across hosts. Keys live under `newsgist:<namespace>:` so `clear`
//! never touches foreign data or another namespace.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::kv::{KvNamespace, KvStore};
use crate::types::{GistError, Result};

const KEY_PREFIX: &str = "newsgist";

/// Open a managed connection, failing fast if the server is unreachable
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url)
        .map_err(|e| GistError::Config(format!("Invalid redis_url '{}': {}", url, e)))?;
    let manager = client.get_connection_manager().await?;
    debug!("Connected to redis");
    Ok(manager)
}

/// Trailing separator keeps one namespace's SCAN pattern off the others
fn key_prefix(namespace: KvNamespace) -> String {
    format!("{}:{}:", KEY_PREFIX, namespace)
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, namespace: KvNamespace) -> Self {
        Self {
            conn,
            prefix: key_prefix(namespace),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.namespaced(key), value).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: usize = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}
