//! JSON record repository over the keyed store.
//!
//! # Responsibility
//! - Persist lifecycle records as JSON documents under `{prefix}:{id}`.
//! - Expose compare-and-swap replacement keyed on the exact stored bytes.
//!
//! # Invariants
//! - `insert` never overwrites a live record.
//! - `replace` succeeds only when the stored document is byte-identical to the
//!   snapshot it was derived from, so a concurrent writer always wins or loses
//!   as a whole.
//! - Records expire `retention_secs` after insertion, or after a caller
//!   supplied lead time plus `retention_secs`; replacement keeps that deadline.

use crate::model::operation::OperationRecord;
use crate::model::replay::ReplayRecord;
use crate::store::{KeyedStore, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository failures.
#[derive(Debug)]
pub enum RepoError {
    Store(StoreError),
    /// A stored document could not be decoded or encoded.
    InvalidData { key: String, message: String },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::InvalidData { key, message } => {
                write!(f, "invalid persisted record at `{key}`: {message}")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::InvalidData { .. } => None,
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// A record type persisted through `KeyedRecordRepository`.
pub trait StoredRecord: Serialize + DeserializeOwned {
    const KEY_PREFIX: &'static str;

    fn record_id(&self) -> &str;
}

impl StoredRecord for OperationRecord {
    const KEY_PREFIX: &'static str = "operation";

    fn record_id(&self) -> &str {
        self.id.as_str()
    }
}

impl StoredRecord for ReplayRecord {
    const KEY_PREFIX: &'static str = "replay";

    fn record_id(&self) -> &str {
        self.id.as_str()
    }
}

/// A decoded record plus the raw document it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub record: T,
    raw: String,
}

impl<T> Snapshot<T> {
    pub fn into_record(self) -> T {
        self.record
    }
}

/// Storage contract used by the lifecycle services.
pub trait RecordRepository<T: StoredRecord>: Send + Sync {
    /// Returns `false` when a live record with the same id already exists.
    fn insert(&self, record: &T) -> RepoResult<bool>;

    fn load(&self, id: &str) -> RepoResult<Option<Snapshot<T>>>;

    /// Writes `next` only if the stored document still matches `current`.
    fn replace(&self, current: &Snapshot<T>, next: &T) -> RepoResult<bool>;

    fn remove(&self, id: &str) -> RepoResult<bool>;
}

/// `RecordRepository` backed by any `KeyedStore`.
pub struct KeyedRecordRepository<S: KeyedStore, T> {
    store: S,
    retention_secs: u64,
    _record: PhantomData<fn() -> T>,
}

impl<S: KeyedStore, T: StoredRecord> KeyedRecordRepository<S, T> {
    pub fn new(store: S, retention_secs: u64) -> Self {
        Self {
            store,
            retention_secs,
            _record: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Like `insert`, but retention starts `lead_secs` after now. Used for
    /// records that must outlive their own deadline.
    pub fn insert_with_lead(&self, record: &T, lead_secs: u64) -> RepoResult<bool> {
        let raw = Self::encode(record)?;
        Ok(self.store.put_if_absent(
            &Self::key(record.record_id()),
            &raw,
            self.retention_secs.saturating_add(lead_secs),
        )?)
    }

    fn key(id: &str) -> String {
        format!("{}:{id}", T::KEY_PREFIX)
    }

    fn encode(record: &T) -> RepoResult<String> {
        serde_json::to_string(record).map_err(|err| RepoError::InvalidData {
            key: Self::key(record.record_id()),
            message: err.to_string(),
        })
    }
}

impl<S: KeyedStore, T: StoredRecord> RecordRepository<T> for KeyedRecordRepository<S, T> {
    fn insert(&self, record: &T) -> RepoResult<bool> {
        self.insert_with_lead(record, 0)
    }

    fn load(&self, id: &str) -> RepoResult<Option<Snapshot<T>>> {
        let key = Self::key(id);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw).map_err(|err| RepoError::InvalidData {
            key,
            message: err.to_string(),
        })?;
        Ok(Some(Snapshot { record, raw }))
    }

    fn replace(&self, current: &Snapshot<T>, next: &T) -> RepoResult<bool> {
        let raw = Self::encode(next)?;
        Ok(self.store.compare_and_swap(
            &Self::key(current.record.record_id()),
            &current.raw,
            &raw,
        )?)
    }

    fn remove(&self, id: &str) -> RepoResult<bool> {
        Ok(self.store.delete(&Self::key(id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyedRecordRepository, RecordRepository};
    use crate::clock::ManualClock;
    use crate::model::operation::{OperationRecord, OperationStatus};
    use crate::store::{InMemoryKeyedStore, KeyedStore};
    use std::sync::Arc;

    fn repo() -> (
        Arc<InMemoryKeyedStore>,
        KeyedRecordRepository<Arc<InMemoryKeyedStore>, OperationRecord>,
    ) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(InMemoryKeyedStore::new(clock));
        (store.clone(), KeyedRecordRepository::new(store, 60))
    }

    #[test]
    fn insert_refuses_duplicates() {
        let (_, repo) = repo();
        let record = OperationRecord::new("op-1", "alice", "urn:acme:fn:export", chrono::Utc::now());
        assert!(repo.insert(&record).expect("first insert"));
        assert!(!repo.insert(&record).expect("second insert"));
    }

    #[test]
    fn stale_snapshot_cannot_replace() {
        let (_, repo) = repo();
        let now = chrono::Utc::now();
        let record = OperationRecord::new("op-1", "alice", "urn:acme:fn:export", now);
        repo.insert(&record).expect("insert");

        let first = repo.load("op-1").expect("load").expect("present");
        let second = repo.load("op-1").expect("load").expect("present");

        let mut next = first.record.clone();
        next.advance(OperationStatus::Processing, now);
        assert!(repo.replace(&first, &next).expect("replace"));

        let mut stale = second.record.clone();
        stale.advance(OperationStatus::Cancelled, now);
        assert!(!repo.replace(&second, &stale).expect("stale replace"));

        let stored = repo.load("op-1").expect("load").expect("present");
        assert_eq!(stored.record.status, OperationStatus::Processing);
    }

    #[test]
    fn corrupt_document_is_reported() {
        let (store, repo) = repo();
        store.put("operation:op-9", "{not json", 0).expect("raw put");
        let err = repo.load("op-9").expect_err("corrupt record must fail");
        assert!(err.to_string().contains("operation:op-9"));
    }
}
