//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite persistence for the summary cache and shared usage totals:
//! - Connection pooling via r2d2 for concurrent access
//! - Panic-safe transactions with automatic rollback
//! - `BEGIN IMMEDIATE` transactions for read-check-write sequences that must
//!   serialize across processes sharing the same file
//! - WAL mode for optimal read/write performance
//!
//! Every method here blocks. Async callers go through [`SqliteStore`] or the
//! SQLite quota store, which hop onto `spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::kv::{KvNamespace, KvStore};
use crate::types::{GistError, Result, ResultExt};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);

CREATE TABLE IF NOT EXISTS usage_totals (
    usage_key     TEXT PRIMARY KEY,
    tokens_used   INTEGER NOT NULL DEFAULT 0,
    requests_made INTEGER NOT NULL DEFAULT 0,
    usd_micros    INTEGER NOT NULL DEFAULT 0,
    updated_at    TEXT
);
"#;

/// Current schema version
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Namespace kv_store keys",
    up: "ALTER TABLE kv_store RENAME TO kv_store_v1;
         CREATE TABLE kv_store (
             namespace  TEXT NOT NULL,
             key        TEXT NOT NULL,
             value      BLOB NOT NULL,
             updated_at TEXT NOT NULL,
             PRIMARY KEY (namespace, key)
         );
         INSERT INTO kv_store (namespace, key, value, updated_at)
             SELECT 'cache', key, value, updated_at FROM kv_store_v1;
         DROP TABLE kv_store_v1;",
}];

const MIN_POOL_SIZE: u32 = 2;
const MAX_POOL_SIZE: u32 = 16;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Two connections per core, clamped
fn optimal_pool_size() -> u32 {
    let cores = std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(4);

    (cores * 2).clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (creating if needed) and initialize the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let max_size = optimal_pool_size();
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some((max_size / 4).max(1)))
            .connection_timeout(std::time::Duration::from_secs(CONNECTION_TIMEOUT_SECS))
            .build(manager)
            .map_err(|e| GistError::Storage(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database for testing or temporary use.
    ///
    /// Single connection, since every in-memory connection is its own database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| GistError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            GistError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .with_context("Failed to read schema version")?;

        if current_version > 0 && current_version < SCHEMA_VERSION {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .with_context("Failed to start migration")?;
            for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
                tx.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;
                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
            tx.commit().with_context("Failed to commit migrations")?;
        }

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .with_context("Failed to set schema version")?;
        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a function within a panic-safe `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so concurrent read-check-write
    /// sequences against the same file serialize instead of racing.
    pub fn immediate_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(GistError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Key-Value Storage
    // =========================================================================

    pub fn kv_get(&self, namespace: KvNamespace, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM kv_store WHERE namespace = ?1 AND key = ?2",
            params![namespace.as_str(), key],
            |row| row.get(0),
        )
        .optional()
        .with_context("Failed to read kv_store")
    }

    pub fn kv_set(&self, namespace: KvNamespace, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(namespace, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![namespace.as_str(), key, value, chrono::Utc::now().to_rfc3339()],
        )
        .with_context("Failed to write kv_store")?;
        Ok(())
    }

    /// Remove every entry in `namespace`, returning the number removed
    pub fn kv_clear(&self, namespace: KvNamespace) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM kv_store WHERE namespace = ?1",
            params![namespace.as_str()],
        )
            .with_context("Failed to clear kv_store")
    }
}

// =============================================================================
// Async Key-Value Adapter
// =============================================================================

/// [`KvStore`] over one namespace of the `kv_store` table
#[derive(Clone)]
pub struct SqliteStore {
    db: SharedDatabase,
    namespace: KvNamespace,
}

impl SqliteStore {
    pub fn new(db: SharedDatabase, namespace: KvNamespace) -> Self {
        Self { db, namespace }
    }
}

/// Run blocking database work off the async worker threads
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GistError::Storage(format!("Blocking database task failed: {}", e)))?
}

#[async_trait]
impl KvStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let (db, namespace) = (Arc::clone(&self.db), self.namespace);
        let key = key.to_string();
        run_blocking(move || db.kv_get(namespace, &key)).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let (db, namespace) = (Arc::clone(&self.db), self.namespace);
        let key = key.to_string();
        let value = value.to_vec();
        run_blocking(move || db.kv_set(namespace, &key, &value)).await
    }

    async fn clear(&self) -> Result<usize> {
        let (db, namespace) = (Arc::clone(&self.db), self.namespace);
        run_blocking(move || db.kv_clear(namespace)).await
    }
}
