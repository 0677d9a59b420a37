//! Quota store implementations

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use rusqlite::{OptionalExtension, params};

use super::{ConsistencyTier, QuotaStore, UsageCaps, UsageDelta, UsageState};
use crate::constants::quota as quota_constants;
use crate::storage::database::run_blocking;
use crate::storage::{SharedDatabase, SharedKvStore};
use crate::types::{GistError, Result};

// =============================================================================
// In-Process
// =============================================================================

/// Mutex-guarded totals, atomic within one process
#[derive(Default)]
pub struct LocalQuotaStore {
    state: Mutex<UsageState>,
}

impl LocalQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for LocalQuotaStore {
    fn tier(&self) -> ConsistencyTier {
        ConsistencyTier::Atomic
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn try_reserve(
        &self,
        delta: &UsageDelta,
        caps: &UsageCaps,
    ) -> Result<Option<UsageState>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !state.admits(delta, caps) {
            return Ok(None);
        }
        state.apply(delta);
        Ok(Some(state.clone()))
    }

    async fn usage(&self) -> Result<UsageState> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// Totals in the `usage_totals` table, serialized by `BEGIN IMMEDIATE`
pub struct SqliteQuotaStore {
    db: SharedDatabase,
    key: String,
}

impl SqliteQuotaStore {
    pub fn new(db: SharedDatabase, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }
}

fn read_usage_row(conn: &rusqlite::Connection, key: &str) -> Result<UsageState> {
    let row = conn
        .query_row(
            "SELECT tokens_used, requests_made, usd_micros, updated_at
             FROM usage_totals WHERE usage_key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    Ok(match row {
        Some((tokens, requests, usd_micros, updated_at)) => UsageState {
            tokens_used: tokens.max(0) as u64,
            requests_made: requests.max(0) as u64,
            usd_micros: usd_micros.max(0) as u64,
            updated_at: updated_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        },
        None => UsageState::default(),
    })
}

#[async_trait]
impl QuotaStore for SqliteQuotaStore {
    fn tier(&self) -> ConsistencyTier {
        ConsistencyTier::Atomic
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn try_reserve(
        &self,
        delta: &UsageDelta,
        caps: &UsageCaps,
    ) -> Result<Option<UsageState>> {
        let db = Arc::clone(&self.db);
        let key = self.key.clone();
        let delta = *delta;
        let caps = *caps;

        run_blocking(move || {
            db.immediate_transaction(|conn| {
                let mut state = read_usage_row(conn, &key)?;
                if !state.admits(&delta, &caps) {
                    return Ok(None);
                }
                state.apply(&delta);

                let updated_at = state.updated_at.map(|t| t.to_rfc3339());
                conn.execute(
                    "INSERT INTO usage_totals (usage_key, tokens_used, requests_made, usd_micros, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(usage_key) DO UPDATE SET
                         tokens_used = excluded.tokens_used,
                         requests_made = excluded.requests_made,
                         usd_micros = excluded.usd_micros,
                         updated_at = excluded.updated_at",
                    params![
                        key,
                        state.tokens_used as i64,
                        state.requests_made as i64,
                        state.usd_micros as i64,
                        updated_at
                    ],
                )?;
                Ok(Some(state))
            })
        })
        .await
    }

    async fn usage(&self) -> Result<UsageState> {
        let db = Arc::clone(&self.db);
        let key = self.key.clone();
        run_blocking(move || {
            let conn = db.connection()?;
            read_usage_row(&conn, &key)
        })
        .await
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Read-check-increment in one script; returns `{0}` or `{1, tokens, requests, usd}`
const RESERVE_SCRIPT: &str = r#"
local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokensUsed') or '0')
local requests = tonumber(redis.call('HGET', KEYS[1], 'requestsMade') or '0')
local usd = tonumber(redis.call('HGET', KEYS[1], 'usdMicros') or '0')

local d_tokens = tonumber(ARGV[1])
local d_requests = tonumber(ARGV[2])
local d_usd = tonumber(ARGV[3])
local max_tokens = tonumber(ARGV[4])
local max_requests = tonumber(ARGV[5])
local max_usd = tonumber(ARGV[6])

if max_tokens > 0 and tokens + d_tokens > max_tokens then return {0} end
if max_requests > 0 and requests + d_requests > max_requests then return {0} end
if max_usd > 0 and usd + d_usd > max_usd then return {0} end

tokens = redis.call('HINCRBY', KEYS[1], 'tokensUsed', d_tokens)
requests = redis.call('HINCRBY', KEYS[1], 'requestsMade', d_requests)
usd = redis.call('HINCRBY', KEYS[1], 'usdMicros', d_usd)
redis.call('HSET', KEYS[1], 'updatedAt', ARGV[7])
return {1, tokens, requests, usd}
"#;

/// Hash at `key` updated by a Lua script, atomic across hosts
pub struct RedisQuotaStore {
    conn: ConnectionManager,
    key: String,
    script: redis::Script,
}

impl RedisQuotaStore {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
            script: redis::Script::new(RESERVE_SCRIPT),
        }
    }
}

/// ARGV[1..=6] for the reservation script, in script order
fn reserve_script_args(delta: &UsageDelta, caps: &UsageCaps) -> [u64; 6] {
    [
        delta.tokens,
        delta.requests,
        delta.usd_micros,
        caps.max_tokens_per_run,
        caps.max_requests_per_run,
        caps.max_usd_micros,
    ]
}

/// Decode the script reply; `None` when the reservation was rejected
fn parse_reserve_reply(reply: &[i64]) -> Result<Option<UsageState>> {
    match reply {
        [0] => Ok(None),
        [1, tokens, requests, usd] => Ok(Some(UsageState {
            tokens_used: (*tokens).max(0) as u64,
            requests_made: (*requests).max(0) as u64,
            usd_micros: (*usd).max(0) as u64,
            updated_at: Some(Utc::now()),
        })),
        other => Err(GistError::storage(format!(
            "Unexpected reservation script reply: {:?}",
            other
        ))),
    }
}

fn usage_from_hash(fields: &HashMap<String, String>) -> UsageState {
    let number = |name: &str| {
        fields
            .get(name)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    };
    UsageState {
        tokens_used: number("tokensUsed"),
        requests_made: number("requestsMade"),
        usd_micros: number("usdMicros"),
        updated_at: fields
            .get("updatedAt")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    fn tier(&self) -> ConsistencyTier {
        ConsistencyTier::Atomic
    }

    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn try_reserve(
        &self,
        delta: &UsageDelta,
        caps: &UsageCaps,
    ) -> Result<Option<UsageState>> {
        let mut conn = self.conn.clone();
        let mut invocation = self.script.key(&self.key);
        for arg in reserve_script_args(delta, caps) {
            invocation.arg(arg);
        }
        invocation.arg(Utc::now().to_rfc3339());

        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;
        parse_reserve_reply(&reply)
    }

    async fn usage(&self) -> Result<UsageState> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.key)
            .query_async(&mut conn)
            .await?;
        Ok(usage_from_hash(&fields))
    }
}

// =============================================================================
// Best-Effort Key-Value
// =============================================================================

/// Optimistic read-check-write over any plain key-value store.
///
/// Not race-free: two callers may read the same totals and both write. Cap
/// violations are rejected immediately; storage errors are retried with
/// linear backoff.
pub struct KvQuotaStore {
    kv: SharedKvStore,
    key: String,
    max_attempts: u32,
    backoff_step: Duration,
}

impl KvQuotaStore {
    pub fn new(kv: SharedKvStore, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            max_attempts: quota_constants::BEST_EFFORT_MAX_RETRIES,
            backoff_step: Duration::from_millis(quota_constants::BEST_EFFORT_BACKOFF_MS),
        }
    }

    async fn read(&self) -> Result<UsageState> {
        match self.kv.get(&self.key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(UsageState::default()),
        }
    }

    async fn attempt(&self, delta: &UsageDelta, caps: &UsageCaps) -> Result<Option<UsageState>> {
        let mut state = self.read().await?;
        if !state.admits(delta, caps) {
            return Ok(None);
        }
        state.apply(delta);
        self.kv.set(&self.key, &serde_json::to_vec(&state)?).await?;
        Ok(Some(state))
    }
}

#[async_trait]
impl QuotaStore for KvQuotaStore {
    fn tier(&self) -> ConsistencyTier {
        ConsistencyTier::BestEffort
    }

    fn backend(&self) -> &'static str {
        self.kv.backend()
    }

    async fn try_reserve(
        &self,
        delta: &UsageDelta,
        caps: &UsageCaps,
    ) -> Result<Option<UsageState>> {
        let mut attempt = 0;
        loop {
            match self.attempt(delta, caps).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "Usage store error, retrying");
                    tokio::time::sleep(self.backoff_step * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn usage(&self) -> Result<UsageState> {
        self.read().await
    }
}
