use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::CacheError;

/// TTL applied when `set` is given none.
pub const DEFAULT_TTL: Duration = Duration::minutes(10);

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: serde_json::Value,
    pub expires_at: OffsetDateTime,
}

/// Key-value store with per-entry TTL, backed by SQLite.
///
/// Rows are loaded into memory once on open. Every `set` is written through
/// before it returns; expired entries are evicted lazily when read.
pub struct CacheStore {
    conn: Connection,
    entries: HashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open (or create) the cache database and load every stored entry.
    pub fn open<P: AsRef<Path>>(db_path: P, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(db_path)?, clock)
    }

    /// Non-durable store, for tests and dry runs.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let mut entries = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT key, payload, expires_at_ms FROM cache_entries")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            for row in rows {
                let (key, payload, expires_at_ms) = row?;
                let Ok(payload) = serde_json::from_str(&payload) else {
                    warn!(key = %short(&key), "Dropping unreadable cache payload");
                    continue;
                };
                entries.insert(
                    key,
                    CacheEntry {
                        payload,
                        expires_at: from_millis(expires_at_ms),
                    },
                );
            }
        }

        info!(entries = entries.len(), "Cache loaded");
        Ok(Self {
            conn,
            entries,
            clock,
        })
    }

    /// Derive a stable cache key from credential fields without keeping the secret.
    pub fn credential_key(root_url: &str, username: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(root_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(username.as_bytes());
        hasher.update([0u8]);
        hasher.update(secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Live payload for `key`, or `None`. An expired entry is removed on the way out.
    pub fn get(&mut self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        if now < entry.expires_at {
            return Some(entry.payload.clone());
        }

        self.entries.remove(key);
        debug!(key = %short(key), "Cache entry expired");
        if let Err(e) = self
            .conn
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
        {
            warn!(key = %short(key), error = %e, "Failed to evict expired cache row");
        }
        None
    }

    /// Typed `get`. A payload of the wrong shape reads as a miss.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let payload = self.get(key)?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %short(key), error = %e, "Cache payload has unexpected shape");
                None
            }
        }
    }

    /// Overwrite `key` and restart its TTL window. Persisted before returning.
    pub fn set(
        &mut self,
        key: &str,
        payload: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry {
            payload,
            expires_at: self.clock.now() + ttl.unwrap_or(DEFAULT_TTL),
        };

        self.conn.execute(
            "INSERT INTO cache_entries (key, payload, expires_at_ms, updated_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                expires_at_ms = excluded.expires_at_ms,
                updated_at = excluded.updated_at",
            params![
                key,
                serde_json::to_string(&entry.payload)?,
                to_millis(entry.expires_at)
            ],
        )?;
        self.entries.insert(key.to_string(), entry.clone());
        debug!(key = %short(key), expires_at = %entry.expires_at, "Cache entry stored");
        Ok(entry)
    }

    /// Typed `set`.
    pub fn set_as<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<CacheEntry, CacheError> {
        self.set(key, serde_json::to_value(value)?, ttl)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Loggable prefix of a key digest.
pub fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
