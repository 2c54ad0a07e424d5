//! Atomic lock extension.
//!
//! Acquires on `ExecutingFunction`, releases on `FunctionExecuted`. A lock
//! still held at `SendingResponse` (a later handler short-circuited) is
//! released there.

use super::{parse_options, to_extension_error};
use crate::extension::event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation};
use crate::extension::kernel::Extension;
use crate::extension::manifest::ExtensionManifest;
use crate::model::lock::{LockRecord, LockScope};
use crate::model::ttl::Ttl;
use crate::protocol::{mask_secret, ExtensionOutput};
use crate::service::lock_service::{LockError, LockRequest, LockService};
use crate::store::KeyedStore;
use chrono::SecondsFormat;
use log::warn;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const ATOMIC_LOCK_URN: &str = "urn:vend:ext:atomic-lock";

#[derive(Debug, Deserialize)]
struct LockOptions {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    ttl: Option<Ttl>,
    #[serde(default)]
    scope: LockScope,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    block: Option<Ttl>,
    #[serde(default = "default_auto_release")]
    auto_release: bool,
}

fn default_auto_release() -> bool {
    true
}

/// Lock held for the current request.
struct HeldLock {
    record: LockRecord,
    auto_release: bool,
}

pub struct AtomicLockExtension<S: KeyedStore> {
    locks: Arc<LockService<S>>,
}

impl<S: KeyedStore> AtomicLockExtension<S> {
    pub fn new(locks: Arc<LockService<S>>) -> Self {
        Self { locks }
    }

    fn acquire(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        let options: LockOptions = parse_options(ATOMIC_LOCK_URN, event.invocation())?;
        let request = LockRequest {
            key: options.key,
            ttl: options.ttl,
            scope: options.scope,
            owner: options.owner,
            block_for: options.block,
        };
        let record = self
            .locks
            .acquire(event.request().function(), &request)
            .map_err(|err| to_extension_error(ATOMIC_LOCK_URN, err.to_error_object()))?;
        event.context_mut().insert(HeldLock {
            record,
            auto_release: options.auto_release,
        });
        Ok(Propagation::Continue)
    }

    fn finish(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        let Some(held) = event.context_mut().remove::<HeldLock>() else {
            return Ok(Propagation::Continue);
        };
        let released = if held.auto_release {
            self.release(&held)?
        } else {
            false
        };
        if let Some(response) = event.response_mut() {
            response.push_extension(lock_output(&held, released));
        }
        Ok(Propagation::Continue)
    }

    /// A lock lost to expiry is reported, not raised; the function already ran.
    fn release(&self, held: &HeldLock) -> Result<bool, ExtensionError> {
        match self.locks.release(&held.record.key, &held.record.owner) {
            Ok(released) => Ok(released),
            Err(err @ LockError::Store(_)) => {
                Err(to_extension_error(ATOMIC_LOCK_URN, err.to_error_object()))
            }
            Err(err) => {
                warn!(
                    "event=lock_auto_release module=lock status=lost code={} scope={}",
                    err.error_code(),
                    held.record.scope().as_str()
                );
                Ok(false)
            }
        }
    }
}

/// The owner is echoed in full only when the caller must release it later.
fn lock_output(held: &HeldLock, released: bool) -> ExtensionOutput {
    let owner = if held.auto_release {
        mask_secret(&held.record.owner)
    } else {
        held.record.owner.clone()
    };
    ExtensionOutput::new(
        ATOMIC_LOCK_URN,
        json!({
            "key": held.record.key.key(),
            "acquired": true,
            "released": released,
            "owner": owner,
            "scope": held.record.scope().as_str(),
            "expires_at": held.record.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
    )
}

impl<S: KeyedStore + 'static> Extension for AtomicLockExtension<S> {
    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(ATOMIC_LOCK_URN, "0.1.0")
            .subscribe(LifecycleEvent::ExecutingFunction, 100)
            .subscribe(LifecycleEvent::FunctionExecuted, -100)
            .subscribe(LifecycleEvent::SendingResponse, 100)
            .with_summary("Distributed mutex held while the function runs")
    }

    fn handles(&self, event: LifecycleEvent) -> bool {
        matches!(
            event,
            LifecycleEvent::ExecutingFunction
                | LifecycleEvent::FunctionExecuted
                | LifecycleEvent::SendingResponse
        )
    }

    fn handle(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        match event.kind() {
            LifecycleEvent::ExecutingFunction => self.acquire(event),
            LifecycleEvent::FunctionExecuted | LifecycleEvent::SendingResponse => {
                self.finish(event)
            }
            LifecycleEvent::RequestValidated => Ok(Propagation::Continue),
        }
    }
}
