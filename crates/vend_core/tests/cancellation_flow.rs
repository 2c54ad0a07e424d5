use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use vend_core::config::CancellationConfig;
use vend_core::model::cancellation::CancellationState;
use vend_core::model::ttl::Ttl;
use vend_core::service::{CancellationError, CancellationService};
use vend_core::{ErrorCode, InMemoryKeyedStore, ManualClock};

fn setup() -> (Arc<ManualClock>, CancellationService<InMemoryKeyedStore>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap(),
    ));
    let store = InMemoryKeyedStore::new(clock.clone());
    (clock, CancellationService::new(store, CancellationConfig::default()))
}

#[test]
fn register_cancel_and_observe() {
    let (_, tokens) = setup();
    assert!(tokens.register("job-7").expect("register"));
    assert!(tokens.is_active("job-7").expect("active"));

    assert!(tokens.cancel("job-7").expect("cancel"));
    assert!(tokens.is_cancelled("job-7").expect("cancelled"));
    assert!(!tokens.is_active("job-7").expect("no longer active"));
}

#[test]
fn repeated_cancel_is_idempotent() {
    let (_, tokens) = setup();
    tokens.register("job-7").expect("register");
    assert!(tokens.cancel("job-7").expect("first cancel"));
    assert!(tokens.cancel("job-7").expect("second cancel"));
    assert_eq!(
        tokens.state("job-7").expect("state"),
        Some(CancellationState::Cancelled)
    );
}

#[test]
fn expired_token_cannot_be_cancelled() {
    let (clock, tokens) = setup();
    tokens
        .register_with_ttl("job-7", Ttl::seconds(5))
        .expect("register");

    clock.advance(Duration::seconds(6));
    assert!(!tokens.cancel("job-7").expect("cancel after expiry"));
    assert!(!tokens.is_active("job-7").expect("expired token is inactive"));
    assert_eq!(tokens.state("job-7").expect("state"), None);
}

#[test]
fn re_registering_does_not_revive_a_cancelled_token() {
    let (_, tokens) = setup();
    tokens.register("job-7").expect("register");
    tokens.cancel("job-7").expect("cancel");

    assert!(tokens.register("job-7").expect("register again"));
    assert!(tokens.is_cancelled("job-7").expect("still cancelled"));
}

#[test]
fn cleanup_is_idempotent() {
    let (_, tokens) = setup();
    tokens.register("job-7").expect("register");
    tokens.cleanup("job-7").expect("first cleanup");
    tokens.cleanup("job-7").expect("second cleanup");
    tokens.cleanup("never-seen").expect("unknown cleanup");
    assert_eq!(tokens.state("job-7").expect("state"), None);
}

#[test]
fn unusual_tokens_are_silently_not_tracked() {
    let (_, tokens) = setup();
    assert!(!tokens.register("job 7; drop").expect("register"));
    assert!(!tokens.cancel("job 7; drop").expect("cancel"));

    let too_long = "x".repeat(CancellationConfig::default().max_token_len + 1);
    assert!(!tokens.register(&too_long).expect("register"));
}

#[test]
fn blank_token_is_an_error() {
    let (_, tokens) = setup();
    let err = tokens.register("  ").expect_err("blank token");
    assert!(matches!(err, CancellationError::TokenRequired));
    assert_eq!(err.error_code(), ErrorCode::CancellationTokenRequired);
}

#[test]
fn cancelled_error_masks_the_token() {
    let error = CancellationError::Cancelled {
        token: "job-123456".to_string(),
    }
    .to_error_object();
    assert!(error.has_code(ErrorCode::Cancelled));
    let rendered = serde_json::to_string(&error).expect("error serializes");
    assert!(!rendered.contains("job-123456"));
}
