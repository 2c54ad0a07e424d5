//! SQLite-backed keyed store.
//!
//! # Responsibility
//! - Persist keyed entries in the `kv_entries` table.
//! - Keep SQL details inside the store boundary.
//!
//! # Invariants
//! - Each primitive runs as one statement or one transaction while holding
//!   the connection mutex.
//! - Liveness is decided against the injected clock, not SQLite's clock.

use super::{expiry_from, KeyedStore, StoreError, StoreResult};
use crate::clock::Clock;
use crate::db::{open_db, open_db_in_memory};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const BACKEND: &str = "sqlite";
const LIVE_PREDICATE: &str = "(expires_at IS NULL OR expires_at > ?2)";

/// SQLite implementation of `KeyedStore`.
pub struct SqliteKeyedStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteKeyedStore {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: Mutex::new(conn),
            clock,
        }
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Ok(Self::new(open_db(path)?, clock))
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Ok(Self::new(open_db_in_memory()?, clock))
    }

    /// Drops every expired row. Returns how many were removed.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.now_ms();
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1;",
            params![now],
        )?;
        Ok(removed)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned(BACKEND))
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn expiry_ms(&self, ttl_seconds: u64) -> Option<i64> {
        expiry_from(self.clock.now(), ttl_seconds).map(|at: DateTime<Utc>| at.timestamp_millis())
    }
}

impl KeyedStore for SqliteKeyedStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.now_ms();
        let conn = self.conn()?;
        let value = conn
            .query_row(
                &format!("SELECT value FROM kv_entries WHERE key = ?1 AND {LIVE_PREDICATE};"),
                params![key, now],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<bool> {
        let now = self.now_ms();
        let expires_at = self.expiry_ms(ttl_seconds);
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM kv_entries
             WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2;",
            params![key, now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3);",
            params![key, value, expires_at],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let expires_at = self.expiry_ms(ttl_seconds);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at;",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.now_ms();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let live = tx.execute(
            &format!("DELETE FROM kv_entries WHERE key = ?1 AND {LIVE_PREDICATE};"),
            params![key, now],
        )?;
        tx.execute("DELETE FROM kv_entries WHERE key = ?1;", params![key])?;
        tx.commit()?;
        Ok(live > 0)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let now = self.now_ms();
        let conn = self.conn()?;
        let removed = conn.execute(
            &format!("DELETE FROM kv_entries WHERE key = ?1 AND {LIVE_PREDICATE} AND value = ?3;"),
            params![key, now, expected],
        )?;
        Ok(removed == 1)
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> StoreResult<bool> {
        let now = self.now_ms();
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!(
                "UPDATE kv_entries SET value = ?4
                 WHERE key = ?1 AND {LIVE_PREDICATE} AND value = ?3;"
            ),
            params![key, now, expected, new_value],
        )?;
        Ok(changed == 1)
    }
}
