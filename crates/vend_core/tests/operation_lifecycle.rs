use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use vend_core::config::OperationConfig;
use vend_core::model::operation::OperationStatus;
use vend_core::service::{OperationError, OperationService};
use vend_core::{ErrorCode, ErrorObject, InMemoryKeyedStore, ManualClock, SqliteKeyedStore};

const FUNCTION: &str = "urn:acme:fn:reports.build";

fn setup(limit: usize) -> (Arc<ManualClock>, OperationService<Arc<InMemoryKeyedStore>>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
    ));
    let store = Arc::new(InMemoryKeyedStore::new(clock.clone()));
    let config = OperationConfig {
        max_active_per_owner: limit,
        ..OperationConfig::default()
    };
    (clock.clone(), OperationService::new(store, clock, config))
}

#[test]
fn happy_path_bumps_version_on_every_step() {
    let (_, operations) = setup(10);
    let created = operations.create("alice", FUNCTION).expect("create");
    assert_eq!(created.status, OperationStatus::Pending);
    assert_eq!(created.version, 1);

    let started = operations.start(&created.id, 1).expect("start");
    assert_eq!(started.version, 2);
    assert!(started.started_at.is_some());

    let progressed = operations
        .update_progress(&created.id, 2, 40)
        .expect("progress");
    assert_eq!(progressed.progress, Some(40));
    assert_eq!(progressed.version, 3);

    let done = operations
        .complete(&created.id, 3, json!({ "rows": 12 }))
        .expect("complete");
    assert_eq!(done.status, OperationStatus::Completed);
    assert_eq!(done.version, 4);
    assert_eq!(done.progress, Some(100));
    assert_eq!(done.result, Some(json!({ "rows": 12 })));
    assert_eq!(operations.get(&created.id).expect("get"), done);
}

#[test]
fn stale_version_is_rejected_with_the_actual_version() {
    let (_, operations) = setup(10);
    let created = operations.create("alice", FUNCTION).expect("create");
    operations.start(&created.id, 1).expect("worker a starts");

    let err = operations
        .update_progress(&created.id, 1, 10)
        .expect_err("worker b holds a stale version");
    match &err {
        OperationError::VersionConflict {
            expected, actual, ..
        } => {
            assert_eq!(*expected, 1);
            assert_eq!(*actual, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    let details = err.to_error_object().details.expect("details");
    assert_eq!(details["actual_version"], 2);
    assert_eq!(operations.get(&created.id).expect("get").version, 2);
}

#[test]
fn progress_above_hundred_clamps() {
    let (_, operations) = setup(10);
    let created = operations.create("alice", FUNCTION).expect("create");
    let updated = operations
        .update_progress(&created.id, 1, 250)
        .expect("progress");
    assert_eq!(updated.progress, Some(100));
    assert_eq!(updated.status, OperationStatus::Pending);
}

#[test]
fn terminal_operations_reject_every_mutation() {
    let (_, operations) = setup(10);
    let created = operations.create("alice", FUNCTION).expect("create");
    let cancelled = operations.cancel(&created.id, 1).expect("cancel pending");
    assert_eq!(cancelled.status, OperationStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let err = operations
        .cancel(&created.id, cancelled.version)
        .expect_err("already cancelled");
    assert_eq!(err.error_code(), ErrorCode::OperationCannotCancel);
    assert_eq!(err.to_error_object().details.expect("details")["status"], "cancelled");

    let err = operations
        .start(&created.id, cancelled.version)
        .expect_err("cannot restart");
    assert_eq!(err.error_code(), ErrorCode::OperationInvalidTransition);

    // Terminal state wins over a stale version.
    let err = operations
        .update_progress(&created.id, 1, 5)
        .expect_err("terminal first");
    assert_eq!(err.error_code(), ErrorCode::OperationInvalidTransition);
}

#[test]
fn pending_cannot_complete_without_starting() {
    let (_, operations) = setup(10);
    let created = operations.create("alice", FUNCTION).expect("create");
    let err = operations
        .complete(&created.id, 1, json!(null))
        .expect_err("pending -> completed is not an edge");
    assert!(matches!(
        err,
        OperationError::InvalidTransition {
            from: OperationStatus::Pending,
            to: OperationStatus::Completed,
            ..
        }
    ));
}

#[test]
fn failure_keeps_reported_errors() {
    let (_, operations) = setup(10);
    let created = operations.create("alice", FUNCTION).expect("create");
    operations.start(&created.id, 1).expect("start");
    let failed = operations
        .fail(
            &created.id,
            2,
            vec![ErrorObject::new("UPSTREAM_DOWN", "warehouse unreachable")],
        )
        .expect("fail");
    assert_eq!(failed.status, OperationStatus::Failed);
    assert_eq!(failed.errors[0].code, "UPSTREAM_DOWN");
    assert!(failed.completed_at.is_some());
}

#[test]
fn quota_counts_only_active_operations_per_owner() {
    let (_, operations) = setup(2);
    let first = operations.create("alice", FUNCTION).expect("first");
    operations.create("alice", FUNCTION).expect("second");

    let err = operations
        .create("alice", FUNCTION)
        .expect_err("third exceeds quota");
    match err {
        OperationError::QuotaExceeded { current, limit } => {
            assert_eq!(current, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    operations.create("bob", FUNCTION).expect("other owner unaffected");

    operations.cancel(&first.id, 1).expect("free a slot");
    operations.create("alice", FUNCTION).expect("slot reused");
    assert_eq!(operations.list_active("alice").expect("list").len(), 2);
}

#[test]
fn list_active_is_oldest_first_and_skips_terminal() {
    let (clock, operations) = setup(10);
    let first = operations.create("alice", FUNCTION).expect("first");
    clock.advance(Duration::seconds(1));
    let second = operations.create("alice", FUNCTION).expect("second");
    clock.advance(Duration::seconds(1));
    let third = operations.create("alice", FUNCTION).expect("third");
    operations.cancel(&second.id, 1).expect("cancel second");

    let ids = operations
        .list_active("alice")
        .expect("list")
        .into_iter()
        .map(|record| record.id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![first.id, third.id]);
    assert!(operations.list_active("nobody").expect("empty").is_empty());
}

#[test]
fn unknown_operation_is_not_found() {
    let (_, operations) = setup(10);
    let err = operations.get("missing").expect_err("unknown id");
    assert_eq!(err.error_code(), ErrorCode::OperationNotFound);
}

#[test]
fn sqlite_backend_keeps_version_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(SqliteKeyedStore::open(dir.path().join("ops.db"), clock.clone()).unwrap());
    let operations = OperationService::new(store, clock, OperationConfig::default());

    let created = operations.create("alice", FUNCTION).expect("create");
    operations.start(&created.id, 1).expect("start");
    let err = operations.start(&created.id, 2).expect_err("already processing");
    assert_eq!(err.error_code(), ErrorCode::OperationInvalidTransition);
    let err = operations
        .complete(&created.id, 1, json!({}))
        .expect_err("stale version");
    assert_eq!(err.error_code(), ErrorCode::OperationVersionConflict);
}

#[test]
fn concurrent_creates_never_exceed_the_quota() {
    let (_, operations) = setup(3);
    let operations = Arc::new(operations);
    let creators = (0..8)
        .map(|_| {
            let operations = Arc::clone(&operations);
            std::thread::spawn(move || operations.create("alice", FUNCTION))
        })
        .collect::<Vec<_>>();

    let mut created = 0;
    for creator in creators {
        match creator.join().expect("creator thread") {
            Ok(_) => created += 1,
            Err(OperationError::QuotaExceeded { limit, .. }) => assert_eq!(limit, 3),
            Err(other) => panic!("unexpected create failure: {other}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(operations.list_active("alice").expect("list").len(), 3);
}
