use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vend_core::model::lock::{LockKey, LockScope};
use vend_core::model::operation::OperationStatus;
use vend_core::model::replay::ReplayStatus;
use vend_core::model::ttl::Ttl;
use vend_core::service::LockRequest;
use vend_core::{
    CoreConfig, CoreRuntime, ErrorObject, ExtensionInvocation, ManualClock, RequestEnvelope,
    ResponseEnvelope,
};

const FUNCTION: &str = "urn:acme:fn:orders.ship";
const LOCK: &str = "urn:vend:ext:atomic-lock";
const CANCELLATION: &str = "urn:vend:ext:cancellation";
const REPLAY: &str = "urn:vend:ext:replay";
const ASYNC: &str = "urn:vend:ext:async";

fn runtime() -> CoreRuntime {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
    ));
    CoreRuntime::builder(&CoreConfig::default(), clock)
        .expect("builder")
        .build()
        .expect("runtime")
}

fn request(invocations: Vec<(&str, Value)>) -> RequestEnvelope {
    invocations.into_iter().fold(
        RequestEnvelope::new("req-1", FUNCTION, json!({ "order": 42 })),
        |request, (urn, options)| request.with_extension(ExtensionInvocation::new(urn, options)),
    )
}

fn lock_options() -> Value {
    json!({ "key": "orders:42", "ttl": { "value": 30, "unit": "second" } })
}

fn order_key() -> LockKey {
    LockKey::scoped(LockScope::Function, FUNCTION, "orders:42")
}

#[test]
fn lock_is_held_during_the_function_and_released_after() {
    let runtime = runtime();
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        let status = runtime
            .services()
            .locks
            .status(&order_key())
            .map_err(|err| err.to_error_object())?;
        Ok(ResponseEnvelope::success(
            request.id.clone(),
            json!({ "locked_while_running": status.locked }),
        ))
    };

    let response = runtime.process(&request(vec![(LOCK, lock_options())]), &executor);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(response.result(), Some(&json!({ "locked_while_running": true })));
    let output = response.extension(LOCK).expect("lock output");
    assert_eq!(output.data["key"], "orders:42");
    assert_eq!(output.data["acquired"], true);
    assert_eq!(output.data["released"], true);
    assert_eq!(output.data["expires_at"], "2026-05-01T09:00:30Z");
    assert!(!runtime.services().locks.status(&order_key()).expect("status").locked);
}

#[test]
fn contended_lock_fails_the_request_without_running_the_function() {
    let runtime = runtime();
    runtime
        .services()
        .locks
        .acquire(FUNCTION, &LockRequest::new("orders:42", Ttl::seconds(30)))
        .expect("someone else holds the key");
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };

    let response = runtime.process(&request(vec![(LOCK, lock_options())]), &executor);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.errors().len(), 1);
    assert_eq!(response.errors()[0].code, "LOCK_ACQUISITION_FAILED");
    assert_eq!(response.errors()[0].details, Some(json!({ "key": "orders:42", "scope": "function" })));
}

#[test]
fn manual_release_lock_echoes_the_owner() {
    let runtime = runtime();
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };
    let options = json!({
        "key": "orders:42",
        "ttl": { "value": 30, "unit": "second" },
        "owner": "worker-7",
        "auto_release": false,
    });

    let response = runtime.process(&request(vec![(LOCK, options)]), &executor);

    let output = response.extension(LOCK).expect("lock output");
    assert_eq!(output.data["released"], false);
    assert_eq!(output.data["owner"], "worker-7");
    let locks = &runtime.services().locks;
    assert!(locks.status(&order_key()).expect("status").locked);
    assert!(locks.release(&order_key(), "worker-7").expect("caller releases"));
}

#[test]
fn cancelled_request_never_runs_the_function() {
    let runtime = runtime();
    let tokens = &runtime.services().cancellation;
    tokens.register("job-7").expect("register");
    assert!(tokens.cancel("job-7").expect("cancel"));
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };

    let response = runtime.process(
        &request(vec![
            (CANCELLATION, json!({ "token": "job-7" })),
            (LOCK, lock_options()),
        ]),
        &executor,
    );

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.errors()[0].code, "CANCELLED");
    // Cancellation runs before the lock, so the key was never taken.
    assert!(!runtime.services().locks.status(&order_key()).expect("status").locked);
    assert_eq!(tokens.state("job-7").expect("state"), None);
}

#[test]
fn active_token_is_cleaned_up_after_the_request() {
    let runtime = runtime();
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        Ok(ResponseEnvelope::success(request.id.clone(), json!({ "ok": true })))
    };

    let response = runtime.process(
        &request(vec![(CANCELLATION, json!({ "token": "job-8" }))]),
        &executor,
    );

    assert!(response.is_success());
    assert!(!runtime.services().cancellation.is_active("job-8").expect("state"));
}

#[test]
fn queued_replay_answers_without_running_and_releases_the_lock() {
    let runtime = runtime();
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };

    let response = runtime.process(
        &request(vec![
            (REPLAY, json!({ "mode": "queue", "ttl": { "value": 1, "unit": "hour" } })),
            (LOCK, lock_options()),
        ]),
        &executor,
    );

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let result = response.result().expect("queued result");
    assert_eq!(result["status"], "queued");
    let replay_id = result["replay_id"].as_str().expect("replay id");
    let replay = response.extension(REPLAY).expect("replay output");
    assert_eq!(replay.data["expires_at"], "2026-05-01T10:00:00Z");

    // The lock acquired before the replay short-circuit is released on the way out.
    let lock = response.extension(LOCK).expect("lock output");
    assert_eq!(lock.data["released"], true);
    assert!(!runtime.services().locks.status(&order_key()).expect("status").locked);

    let stored = runtime.services().replays.status(replay_id).expect("stored replay");
    assert_eq!(stored.status, ReplayStatus::Queued);
}

#[test]
fn immediate_replay_records_the_processed_result() {
    let runtime = runtime();
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        Ok(ResponseEnvelope::success(request.id.clone(), json!({ "shipped": true })))
    };

    let response = runtime.process(&request(vec![(REPLAY, json!({}))]), &executor);

    assert_eq!(response.result(), Some(&json!({ "shipped": true })));
    let output = response.extension(REPLAY).expect("replay output");
    assert_eq!(output.data["status"], "processed");
    assert_eq!(output.data["attempts"], 1);
    let stored = runtime
        .services()
        .replays
        .status(output.data["replay_id"].as_str().expect("replay id"))
        .expect("stored replay");
    assert_eq!(stored.result, Some(json!({ "shipped": true })));
}

#[test]
fn async_request_returns_a_pending_operation() {
    let runtime = runtime();
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };

    let response = runtime.process(&request(vec![(ASYNC, json!({ "owner": "alice" }))]), &executor);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let result = response.result().expect("async result");
    assert_eq!(result["status"], "pending");
    let operation_id = result["operation_id"].as_str().expect("operation id");
    let output = response.extension(ASYNC).expect("async output");
    assert_eq!(output.data["version"], 1);

    let operations = &runtime.services().operations;
    let stored = operations.get(operation_id).expect("stored operation");
    assert_eq!(stored.status, OperationStatus::Pending);
    assert_eq!(stored.owner, "alice");
    assert_eq!(operations.list_active("alice").expect("list").len(), 1);
}

#[test]
fn malformed_options_fail_with_a_stable_code() {
    let runtime = runtime();
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };

    let response = runtime.process(
        &request(vec![(LOCK, json!({ "key": "orders:42", "ttl": "soon" }))]),
        &executor,
    );

    assert_eq!(response.errors()[0].code, "INVALID_EXTENSION_OPTIONS");
    assert_eq!(response.errors()[0].details, Some(json!({ "urn": LOCK })));
}

#[test]
fn lock_without_ttl_is_rejected() {
    let runtime = runtime();
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };

    let response = runtime.process(&request(vec![(LOCK, json!({ "key": "orders:42" }))]), &executor);

    assert_eq!(response.errors()[0].code, "LOCK_TTL_REQUIRED");
}

#[test]
fn overlong_lock_ttl_is_rejected_before_the_store_is_touched() {
    let runtime = runtime();
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };
    let options = json!({
        "key": "orders:42",
        "ttl": { "value": 10_000_000_000u64, "unit": "day" },
    });

    let response = runtime.process(&request(vec![(LOCK, options)]), &executor);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.errors()[0].code, "LOCK_TTL_OUT_OF_RANGE");
    assert!(!runtime.services().locks.status(&order_key()).expect("status").locked);
}

#[test]
fn overlong_replay_ttl_is_rejected() {
    let runtime = runtime();
    let calls = AtomicUsize::new(0);
    let executor = |request: &RequestEnvelope| -> Result<ResponseEnvelope, ErrorObject> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope::success(request.id.clone(), json!(null)))
    };
    let options = json!({
        "mode": "queue",
        "ttl": { "value": 10_000_000_000u64, "unit": "day" },
    });

    let response = runtime.process(&request(vec![(REPLAY, options)]), &executor);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(response.errors()[0].code, "REPLAY_TTL_OUT_OF_RANGE");
    let details = response.errors()[0].details.clone().expect("details");
    assert_eq!(details["ttl_secs"], 864_000_000_000_000u64);
}
