//! Process-local keyed store.
//!
//! One mutex serializes every primitive, which makes each call atomic.
//! Expired entries are purged lazily on access.

use super::{expiry_from, KeyedStore, StoreError, StoreResult};
use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// In-memory `KeyedStore` backend.
pub struct InMemoryKeyedStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKeyedStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Number of live entries.
    pub fn len(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        Ok(self
            .entries()?
            .values()
            .filter(|entry| entry.is_live(now))
            .count())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }

    fn entries(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Poisoned(BACKEND))
    }

    /// Locks the map and evicts `key` if it has expired.
    fn entries_for(&self, key: &str) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        let now = self.clock.now();
        let mut entries = self.entries()?;
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        Ok(entries)
    }
}

impl KeyedStore for InMemoryKeyedStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries_for(key)?;
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    fn put_if_absent(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<bool> {
        let mut entries = self.entries_for(key)?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry_from(self.clock.now(), ttl_seconds),
            },
        );
        Ok(true)
    }

    fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let mut entries = self.entries()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: expiry_from(self.clock.now(), ttl_seconds),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries_for(key)?;
        Ok(entries.remove(key).is_some())
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut entries = self.entries_for(key)?;
        match entries.get(key) {
            Some(entry) if entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn compare_and_swap(&self, key: &str, expected: &str, new_value: &str) -> StoreResult<bool> {
        let mut entries = self.entries_for(key)?;
        match entries.get_mut(key) {
            Some(entry) if entry.value == expected => {
                entry.value = new_value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryKeyedStore;
    use crate::clock::ManualClock;
    use crate::store::KeyedStore;
    use chrono::Duration;
    use std::sync::Arc;

    fn store() -> (Arc<ManualClock>, InMemoryKeyedStore) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = InMemoryKeyedStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn put_if_absent_only_writes_once() {
        let (_, store) = store();
        assert!(store.put_if_absent("k", "a", 10).expect("first write"));
        assert!(!store.put_if_absent("k", "b", 10).expect("second write"));
        assert_eq!(store.get("k").expect("get").as_deref(), Some("a"));
    }

    #[test]
    fn expired_entries_behave_as_absent() {
        let (clock, store) = store();
        store.put("k", "a", 5).expect("put");
        clock.advance(Duration::seconds(5));

        assert_eq!(store.get("k").expect("get"), None);
        assert!(!store.delete("k").expect("delete"));
        assert!(store.put_if_absent("k", "b", 5).expect("rewrite after expiry"));
    }

    #[test]
    fn compare_and_swap_keeps_expiry() {
        let (clock, store) = store();
        store.put("k", "a", 10).expect("put");
        clock.advance(Duration::seconds(6));
        assert!(store.compare_and_swap("k", "a", "b").expect("cas"));
        assert!(!store.compare_and_swap("k", "a", "c").expect("stale cas"));

        clock.advance(Duration::seconds(4));
        assert_eq!(store.get("k").expect("get"), None);
    }

    #[test]
    fn compare_and_delete_requires_match() {
        let (_, store) = store();
        store.put("k", "owner-a", 0).expect("put");
        assert!(!store.compare_and_delete("k", "owner-b").expect("mismatch"));
        assert!(store.compare_and_delete("k", "owner-a").expect("match"));
        assert_eq!(store.get("k").expect("get"), None);
    }

    #[test]
    fn restore_handle_checks_owner() {
        let (_, store) = store();
        store.put("lock:x", "owner-a", 30).expect("put");
        assert!(store
            .restore_handle("lock:x", "owner-a")
            .expect("restore")
            .is_some());
        assert!(store
            .restore_handle("lock:x", "owner-b")
            .expect("restore")
            .is_none());
    }

    #[test]
    fn purge_expired_reports_removed_count() {
        let (clock, store) = store();
        store.put("a", "1", 1).expect("put");
        store.put("b", "2", 0).expect("put");
        clock.advance(Duration::seconds(2));
        assert_eq!(store.purge_expired().expect("purge"), 1);
        assert_eq!(store.len().expect("len"), 1);
    }
}
