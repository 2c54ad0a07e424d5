use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use vend_core::{InMemoryKeyedStore, KeyedStore, ManualClock, SqliteKeyedStore};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
    ))
}

/// Runs the same primitive contract against every backend.
fn for_each_backend(check: impl Fn(&dyn KeyedStore, &ManualClock)) {
    let memory_clock = clock();
    let memory = InMemoryKeyedStore::new(memory_clock.clone());
    check(&memory, &memory_clock);

    let sqlite_clock = clock();
    let sqlite = SqliteKeyedStore::open_in_memory(sqlite_clock.clone()).unwrap();
    check(&sqlite, &sqlite_clock);

    let dir = tempfile::tempdir().unwrap();
    let file_clock = clock();
    let file = SqliteKeyedStore::open(dir.path().join("store.db"), file_clock.clone()).unwrap();
    check(&file, &file_clock);
}

#[test]
fn put_if_absent_writes_once() {
    for_each_backend(|store, _| {
        assert!(store.put_if_absent("k", "first", 30).unwrap());
        assert!(!store.put_if_absent("k", "second", 30).unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("first"));
    });
}

#[test]
fn expired_entries_look_absent() {
    for_each_backend(|store, clock| {
        assert!(store.put_if_absent("k", "old", 5).unwrap());
        clock.advance(Duration::seconds(5));
        assert_eq!(store.get("k").unwrap(), None);
        assert!(!store.delete("k").unwrap());
        assert!(store.put_if_absent("k", "new", 5).unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
    });
}

#[test]
fn zero_ttl_never_expires() {
    for_each_backend(|store, clock| {
        store.put("k", "forever", 0).unwrap();
        clock.advance(Duration::days(365));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("forever"));
    });
}

#[test]
fn compare_primitives_require_matching_value() {
    for_each_backend(|store, _| {
        store.put("k", "a", 60).unwrap();

        assert!(!store.compare_and_swap("k", "b", "c").unwrap());
        assert!(store.compare_and_swap("k", "a", "b").unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("b"));

        assert!(!store.compare_and_delete("k", "a").unwrap());
        assert!(store.compare_and_delete("k", "b").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    });
}

#[test]
fn compare_and_swap_keeps_expiry() {
    for_each_backend(|store, clock| {
        store.put("k", "a", 10).unwrap();
        clock.advance(Duration::seconds(6));
        assert!(store.compare_and_swap("k", "a", "b").unwrap());
        clock.advance(Duration::seconds(4));
        assert_eq!(store.get("k").unwrap(), None);
    });
}

#[test]
fn restore_handle_matches_owner_only() {
    for_each_backend(|store, _| {
        store.put("lock:orders:42", "owner-1", 30).unwrap();
        let handle = store
            .restore_handle("lock:orders:42", "owner-1")
            .unwrap()
            .expect("owner matches");
        assert_eq!(handle.owner, "owner-1");
        assert!(store
            .restore_handle("lock:orders:42", "owner-2")
            .unwrap()
            .is_none());
        assert!(store.restore_handle("lock:missing", "owner-1").unwrap().is_none());
    });
}

#[test]
fn sqlite_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let clock = clock();

    let first = SqliteKeyedStore::open(&path, clock.clone()).unwrap();
    first.put("operation:op-1", "{}", 60).unwrap();
    drop(first);

    let second = SqliteKeyedStore::open(&path, clock.clone()).unwrap();
    assert_eq!(second.get("operation:op-1").unwrap().as_deref(), Some("{}"));
    clock.advance(Duration::seconds(61));
    assert_eq!(second.purge_expired().unwrap(), 1);
}
