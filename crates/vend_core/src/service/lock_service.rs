//! Atomic lock use-cases.
//!
//! # Responsibility
//! - Acquire, release, force-release and inspect distributed locks.
//! - Maintain `owner`, `acquired_at` and `expires_at` metadata keys beside
//!   each primary lock key.
//!
//! # Invariants
//! - Non-blocking acquire is one `put_if_absent`; it is never retried.
//! - Blocking acquire polls within a bounded wall-clock budget; waiters are
//!   not queued or ordered.
//! - Release deletes only when the caller's owner matches the stored owner.
//! - Errors carry the caller key, never the store key or the owner token.

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::logging::log_field;
use crate::model::lock::{LockHandle, LockKey, LockRecord, LockScope, LockStatus};
use crate::model::ttl::{Ttl, MAX_TTL_SECONDS};
use crate::protocol::{mask_secret, ErrorCode, ErrorObject};
use crate::store::{KeyedStore, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type LockResult<T> = Result<T, LockError>;

/// Lock failures.
#[derive(Debug)]
pub enum LockError {
    KeyRequired,
    TtlRequired,
    /// The TTL does not fit a representable expiry instant.
    TtlOutOfRange { seconds: u64 },
    /// The key is held by someone else (non-blocking path).
    AcquisitionFailed { key: String, scope: LockScope },
    /// The blocking budget ran out.
    Timeout {
        key: String,
        scope: LockScope,
        waited: Duration,
    },
    OwnershipMismatch { key: String, scope: LockScope },
    NotFound { key: String, scope: LockScope },
    Store(StoreError),
}

impl LockError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::KeyRequired => ErrorCode::LockKeyRequired,
            Self::TtlRequired => ErrorCode::LockTtlRequired,
            Self::TtlOutOfRange { .. } => ErrorCode::LockTtlOutOfRange,
            Self::AcquisitionFailed { .. } => ErrorCode::LockAcquisitionFailed,
            Self::Timeout { .. } => ErrorCode::LockTimeout,
            Self::OwnershipMismatch { .. } => ErrorCode::LockOwnershipMismatch,
            Self::NotFound { .. } => ErrorCode::LockNotFound,
            Self::Store(_) => ErrorCode::StoreUnavailable,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::from_code(self.error_code(), self.to_string());
        match self {
            Self::AcquisitionFailed { key, scope }
            | Self::OwnershipMismatch { key, scope }
            | Self::NotFound { key, scope } => {
                error.with_details(json!({ "key": key, "scope": scope.as_str() }))
            }
            Self::Timeout { key, scope, waited } => error.with_details(json!({
                "key": key,
                "scope": scope.as_str(),
                "waited_ms": u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            })),
            Self::TtlOutOfRange { seconds } => error.with_details(json!({
                "ttl_secs": seconds,
                "max_ttl_secs": MAX_TTL_SECONDS,
            })),
            Self::KeyRequired | Self::TtlRequired | Self::Store(_) => error,
        }
    }

    fn acquisition_failed(key: &LockKey) -> Self {
        Self::AcquisitionFailed {
            key: key.key().to_string(),
            scope: key.scope(),
        }
    }

    fn not_found(key: &LockKey) -> Self {
        Self::NotFound {
            key: key.key().to_string(),
            scope: key.scope(),
        }
    }
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyRequired => write!(f, "lock key is required"),
            Self::TtlRequired => write!(f, "lock ttl is required"),
            Self::TtlOutOfRange { seconds } => write!(
                f,
                "lock ttl of {seconds}s exceeds the maximum of {MAX_TTL_SECONDS}s"
            ),
            Self::AcquisitionFailed { key, .. } => {
                write!(f, "lock `{key}` is already held")
            }
            Self::Timeout { key, waited, .. } => write!(
                f,
                "timed out after {}ms waiting for lock `{key}`",
                waited.as_millis()
            ),
            Self::OwnershipMismatch { key, .. } => {
                write!(f, "lock `{key}` is held by a different owner")
            }
            Self::NotFound { key, .. } => write!(f, "lock `{key}` not found"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LockError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Arguments for one acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockRequest {
    pub key: Option<String>,
    pub ttl: Option<Ttl>,
    pub scope: LockScope,
    /// Caller-chosen owner token; a random one is generated when absent.
    pub owner: Option<String>,
    /// Wait budget; `None` means fail immediately when held.
    pub block_for: Option<Ttl>,
}

impl LockRequest {
    pub fn new(key: impl Into<String>, ttl: Ttl) -> Self {
        Self {
            key: Some(key.into()),
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: LockScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn blocking_for(mut self, wait: Ttl) -> Self {
        self.block_for = Some(wait);
        self
    }
}

/// Distributed mutex over a `KeyedStore`.
pub struct LockService<S: KeyedStore> {
    store: S,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl<S: KeyedStore> LockService<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: LockConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Acquires a lock for `function_urn`.
    ///
    /// # Errors
    /// - `KeyRequired`/`TtlRequired`/`TtlOutOfRange` before the store is touched.
    /// - `AcquisitionFailed` when held and no wait budget was given.
    /// - `Timeout` when the wait budget elapses.
    pub fn acquire(&self, function_urn: &str, request: &LockRequest) -> LockResult<LockRecord> {
        let key = match request.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key,
            _ => return Err(LockError::KeyRequired),
        };
        let ttl = match request.ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => return Err(LockError::TtlRequired),
        };
        if !ttl.is_within_limit() {
            return Err(LockError::TtlOutOfRange {
                seconds: ttl.as_seconds(),
            });
        }

        let lock_key = LockKey::scoped(request.scope, function_urn, key);
        let owner = request
            .owner
            .clone()
            .filter(|owner| !owner.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match request.block_for {
            Some(wait) if !wait.is_zero() => self.acquire_blocking(&lock_key, &owner, ttl, wait)?,
            _ => {
                if !self.try_acquire(&lock_key, &owner, ttl)? {
                    debug!(
                        "event=lock_acquire module=lock status=held key={} scope={}",
                        log_field(lock_key.key()),
                        lock_key.scope().as_str()
                    );
                    return Err(LockError::acquisition_failed(&lock_key));
                }
            }
        }

        let acquired_at = self.clock.now();
        let expires_at = ttl
            .deadline_from(acquired_at)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.write_metadata(&lock_key, &owner, acquired_at, expires_at, ttl)?;

        info!(
            "event=lock_acquire module=lock status=ok key={} scope={} owner={} ttl_secs={}",
            log_field(lock_key.key()),
            lock_key.scope().as_str(),
            mask_secret(&owner),
            ttl.as_seconds()
        );
        Ok(LockRecord {
            key: lock_key,
            owner,
            acquired_at,
            expires_at,
        })
    }

    /// Releases a lock held by `owner`. Returns whether this call deleted it.
    ///
    /// # Errors
    /// - `NotFound` when no live lock exists.
    /// - `OwnershipMismatch` when another owner holds it; nothing is deleted.
    pub fn release(&self, key: &LockKey, owner: &str) -> LockResult<bool> {
        match self.store.get(key.as_str())? {
            None => return Err(LockError::not_found(key)),
            Some(stored) if stored != owner => {
                warn!(
                    "event=lock_release module=lock status=owner_mismatch key={} scope={}",
                    log_field(key.key()),
                    key.scope().as_str()
                );
                return Err(LockError::OwnershipMismatch {
                    key: key.key().to_string(),
                    scope: key.scope(),
                });
            }
            Some(_) => {}
        }

        let released = self.store.compare_and_delete(key.as_str(), owner)?;
        if released {
            self.delete_metadata(key)?;
        }
        info!(
            "event=lock_release module=lock status={} key={} scope={}",
            if released { "ok" } else { "raced" },
            log_field(key.key()),
            key.scope().as_str()
        );
        Ok(released)
    }

    /// Releases through a handle rebuilt by `restore`.
    pub fn release_handle(&self, handle: &LockHandle) -> LockResult<bool> {
        self.release(&handle.key, &handle.owner)
    }

    /// Deletes a lock regardless of owner. Returns whether one was live.
    pub fn force_release(&self, key: &LockKey) -> LockResult<bool> {
        let existed = self.store.delete(key.as_str())?;
        self.delete_metadata(key)?;
        warn!(
            "event=lock_force_release module=lock status=ok key={} scope={} existed={}",
            log_field(key.key()),
            key.scope().as_str(),
            existed
        );
        Ok(existed)
    }

    /// Reports lock state from the metadata keys.
    ///
    /// `ttl_remaining` is clamped at zero once `expires_at` has passed on this
    /// service's clock, even if the store still holds the key.
    pub fn status(&self, key: &LockKey) -> LockResult<LockStatus> {
        let primary = self.store.get(key.as_str())?;
        if primary.is_none() {
            return Ok(LockStatus::unlocked());
        }

        let owner = self.store.get(&key.owner_key())?.or(primary);
        let acquired_at = self
            .store
            .get(&key.acquired_at_key())?
            .and_then(|raw| parse_timestamp(&raw));
        let expires_at = self
            .store
            .get(&key.expires_at_key())?
            .and_then(|raw| parse_timestamp(&raw));
        let ttl_remaining = expires_at.map(|expires_at| {
            let remaining = (expires_at - self.clock.now()).num_seconds();
            u64::try_from(remaining).unwrap_or(0)
        });

        Ok(LockStatus {
            locked: true,
            owner,
            acquired_at,
            expires_at,
            ttl_remaining,
        })
    }

    /// Rebuilds an owner handle when `owner` still holds `key`.
    pub fn restore(&self, key: &LockKey, owner: &str) -> LockResult<Option<LockHandle>> {
        Ok(self
            .store
            .restore_handle(key.as_str(), owner)?
            .map(|handle| LockHandle {
                key: key.clone(),
                owner: handle.owner,
            }))
    }

    fn try_acquire(&self, key: &LockKey, owner: &str, ttl: Ttl) -> LockResult<bool> {
        Ok(self
            .store
            .put_if_absent(key.as_str(), owner, ttl.as_seconds())?)
    }

    fn acquire_blocking(&self, key: &LockKey, owner: &str, ttl: Ttl, wait: Ttl) -> LockResult<()> {
        let budget = wait.as_std_duration().min(self.config.max_block());
        let started = Instant::now();
        let deadline = started + budget;

        loop {
            if self.try_acquire(key, owner, ttl)? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                let waited = started.elapsed();
                warn!(
                    "event=lock_acquire module=lock status=timeout key={} scope={} waited_ms={}",
                    log_field(key.key()),
                    key.scope().as_str(),
                    waited.as_millis()
                );
                return Err(LockError::Timeout {
                    key: key.key().to_string(),
                    scope: key.scope(),
                    waited,
                });
            }
            std::thread::sleep(self.config.poll_interval().min(deadline - now));
        }
    }

    fn write_metadata(
        &self,
        key: &LockKey,
        owner: &str,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        ttl: Ttl,
    ) -> LockResult<()> {
        let ttl_seconds = ttl.as_seconds();
        self.store.put(&key.owner_key(), owner, ttl_seconds)?;
        self.store
            .put(&key.acquired_at_key(), &format_timestamp(acquired_at), ttl_seconds)?;
        self.store
            .put(&key.expires_at_key(), &format_timestamp(expires_at), ttl_seconds)?;
        Ok(())
    }

    fn delete_metadata(&self, key: &LockKey) -> LockResult<()> {
        for metadata_key in key.metadata_keys() {
            self.store.delete(&metadata_key)?;
        }
        Ok(())
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
