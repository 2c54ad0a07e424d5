//! First-party extensions and their wiring.
//!
//! # Responsibility
//! - Provide lock, cancellation, async operation and replay extensions.
//! - Build their services over one shared keyed store.
//!
//! # Invariants
//! - Built-ins are non-global and fatal on error.
//! - Every built-in reads options through `parse_options`, so malformed
//!   options fail the same way everywhere.

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::extension::event::ExtensionError;
use crate::extension::kernel::{ExtensionRegistry, RegistrationError};
use crate::protocol::{ErrorCode, ErrorObject, ExtensionInvocation};
use crate::service::{CancellationService, LockService, OperationService, ReplayService};
use crate::store::KeyedStore;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub mod async_operation;
pub mod atomic_lock;
pub mod cancellation;
pub mod replay;

pub use async_operation::{AsyncOperationExtension, ASYNC_URN};
pub use atomic_lock::{AtomicLockExtension, ATOMIC_LOCK_URN};
pub use cancellation::{CancellationExtension, CANCELLATION_URN};
pub use replay::{ReplayExtension, REPLAY_URN};

/// Services behind the built-ins, shared with out-of-band callers such as a
/// `cancel` endpoint or an operation worker.
pub struct BuiltinServices<S: KeyedStore + Clone> {
    pub locks: Arc<LockService<S>>,
    pub cancellation: Arc<CancellationService<S>>,
    pub operations: Arc<OperationService<S>>,
    pub replays: Arc<ReplayService<S>>,
}

impl<S: KeyedStore + Clone + 'static> BuiltinServices<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: &CoreConfig) -> Self {
        Self {
            locks: Arc::new(LockService::new(
                store.clone(),
                clock.clone(),
                config.lock,
            )),
            cancellation: Arc::new(CancellationService::new(
                store.clone(),
                config.cancellation,
            )),
            operations: Arc::new(OperationService::new(
                store.clone(),
                clock.clone(),
                config.operations,
            )),
            replays: Arc::new(ReplayService::new(store, clock, config.replay)),
        }
    }

    /// Registers all four built-ins into `registry`.
    pub fn register_all(&self, registry: &mut ExtensionRegistry) -> Result<(), RegistrationError> {
        registry.register(Arc::new(CancellationExtension::new(
            self.cancellation.clone(),
        )))?;
        registry.register(Arc::new(AtomicLockExtension::new(self.locks.clone())))?;
        registry.register(Arc::new(ReplayExtension::new(self.replays.clone())))?;
        registry.register(Arc::new(AsyncOperationExtension::new(
            self.operations.clone(),
        )))?;
        Ok(())
    }
}

/// Decodes invocation options; an absent invocation decodes from `{}`.
pub(crate) fn parse_options<T: DeserializeOwned>(
    urn: &str,
    invocation: Option<&ExtensionInvocation>,
) -> Result<T, ExtensionError> {
    let options = invocation
        .map(|invocation| invocation.options.clone())
        .unwrap_or_else(Map::new);
    serde_json::from_value(Value::Object(options)).map_err(|err| {
        ExtensionError::new(
            urn,
            ErrorObject::from_code(
                ErrorCode::InvalidExtensionOptions,
                format!("invalid options: {err}"),
            )
            .with_details(json!({ "urn": urn })),
        )
    })
}

pub(crate) fn to_extension_error(urn: &str, error: ErrorObject) -> ExtensionError {
    ExtensionError::new(urn, error)
}

#[cfg(test)]
mod tests {
    use super::parse_options;
    use crate::model::ttl::Ttl;
    use crate::protocol::ExtensionInvocation;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        ttl: Option<Ttl>,
    }

    #[test]
    fn missing_invocation_reads_empty_options() {
        let sample: Sample = parse_options("urn:vend:ext:sample", None).expect("defaults");
        assert!(sample.ttl.is_none());
    }

    #[test]
    fn malformed_options_map_to_stable_code() {
        let invocation =
            ExtensionInvocation::new("urn:vend:ext:sample", json!({ "ttl": "forever" }));
        let err = parse_options::<Sample>("urn:vend:ext:sample", Some(&invocation))
            .expect_err("bad ttl must fail");
        assert_eq!(err.urn, "urn:vend:ext:sample");
        assert_eq!(err.error.code, "INVALID_EXTENSION_OPTIONS");
    }
}
