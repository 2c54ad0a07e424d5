//! Shared keyed store boundary.
//!
//! # Responsibility
//! - Define the atomic string-keyed primitives backing locks, cancellation
//!   tokens and lifecycle records.
//! - Provide in-memory and SQLite backends.
//!
//! # Invariants
//! - Every primitive is atomic at the key level.
//! - An expired entry is indistinguishable from an absent one.
//! - A TTL of `0` means the entry never expires.
//! - `compare_and_swap` keeps the entry's current expiry.

use crate::db::DbError;
use chrono::{DateTime, Duration, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryKeyedStore;
pub use sqlite::SqliteKeyedStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Backend failures surfaced by store primitives.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// A backend mutex was poisoned by a panicking holder.
    Poisoned(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "store backend failure: {err}"),
            Self::Poisoned(backend) => write!(f, "store backend `{backend}` is poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Poisoned(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Proof that `owner` currently holds `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHandle {
    pub key: String,
    pub owner: String,
}

/// Atomic keyed-store primitives.
pub trait KeyedStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes `value` only when no live entry exists. Returns whether it wrote.
    fn put_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<bool>;

    fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()>;

    /// Removes the entry. Returns whether a live entry existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Removes the entry only when its live value equals `expected`.
    fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Replaces the live value only when it equals `expected`; keeps the expiry.
    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> StoreResult<bool>;

    /// Returns a handle when `key` is live and held by `owner`.
    fn restore_handle(&self, key: &str, owner: &str) -> StoreResult<Option<StoreHandle>> {
        match self.get(key)? {
            Some(stored) if stored == owner => Ok(Some(StoreHandle {
                key: key.to_string(),
                owner: owner.to_string(),
            })),
            _ => Ok(None),
        }
    }
}

impl<S: KeyedStore + ?Sized> KeyedStore for Arc<S> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<bool> {
        (**self).put_if_absent(key, value, ttl_seconds)
    }

    fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        (**self).put(key, value, ttl_seconds)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        (**self).compare_and_delete(key, expected)
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> StoreResult<bool> {
        (**self).compare_and_swap(key, expected, new_value)
    }

    fn restore_handle(&self, key: &str, owner: &str) -> StoreResult<Option<StoreHandle>> {
        (**self).restore_handle(key, owner)
    }
}

/// Absolute expiry for a TTL in seconds; `None` for `0`.
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl_seconds: u64) -> Option<DateTime<Utc>> {
    if ttl_seconds == 0 {
        return None;
    }
    let secs = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
    let delta = Duration::try_seconds(secs).unwrap_or(Duration::MAX);
    Some(now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
}
