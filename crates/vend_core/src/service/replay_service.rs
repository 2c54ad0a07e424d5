//! Replay lifecycle.
//!
//! # Responsibility
//! - Enqueue, trigger, complete, fail and cancel replay records.
//! - Record immediate executions as terminal `processed` records.
//!
//! # Invariants
//! - Every call on an existing id runs the guards in order: not found,
//!   already complete, cancelled, expired. Only then is the edge checked.
//! - Only queued records expire; the transition is persisted lazily by the
//!   first call that observes it.
//! - Writes are compare-and-swap; losing a race is `ConcurrentModification`.

use crate::clock::Clock;
use crate::config::ReplayConfig;
use crate::logging::log_field;
use crate::model::replay::{ReplayRecord, ReplayStatus};
use crate::model::ttl::{Ttl, MAX_TTL_SECONDS};
use crate::protocol::{ErrorCode, ErrorObject};
use crate::repo::{KeyedRecordRepository, RecordRepository, RepoError, Snapshot};
use crate::store::{KeyedStore, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

pub type ReplayResult<T> = Result<T, ReplayError>;

#[derive(Debug)]
pub enum ReplayError {
    NotFound {
        id: String,
    },
    AlreadyComplete {
        id: String,
        completed_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        id: String,
        cancelled_at: Option<DateTime<Utc>>,
    },
    Expired {
        id: String,
        expired_at: Option<DateTime<Utc>>,
    },
    InvalidTransition {
        id: String,
        from: ReplayStatus,
        to: ReplayStatus,
    },
    ConcurrentModification {
        id: String,
    },
    /// The requested TTL does not fit a representable expiry instant.
    TtlOutOfRange {
        seconds: u64,
    },
    Repo(RepoError),
}

impl ReplayError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::ReplayNotFound,
            Self::AlreadyComplete { .. } => ErrorCode::ReplayAlreadyComplete,
            Self::Cancelled { .. } => ErrorCode::ReplayCancelled,
            Self::Expired { .. } => ErrorCode::ReplayExpired,
            Self::InvalidTransition { .. } => ErrorCode::ReplayInvalidTransition,
            Self::ConcurrentModification { .. } => ErrorCode::ReplayConcurrentModification,
            Self::TtlOutOfRange { .. } => ErrorCode::ReplayTtlOutOfRange,
            Self::Repo(RepoError::Store(_)) => ErrorCode::StoreUnavailable,
            Self::Repo(RepoError::InvalidData { .. }) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::from_code(self.error_code(), self.to_string());
        match self {
            Self::NotFound { id } | Self::ConcurrentModification { id } => {
                error.with_details(json!({ "replay_id": id }))
            }
            Self::AlreadyComplete { id, completed_at } => error.with_details(json!({
                "replay_id": id,
                "completed_at": completed_at.map(format_seconds),
            })),
            Self::Cancelled { id, cancelled_at } => error.with_details(json!({
                "replay_id": id,
                "cancelled_at": cancelled_at.map(format_seconds),
            })),
            Self::Expired { id, expired_at } => error.with_details(json!({
                "replay_id": id,
                "expired_at": expired_at.map(format_seconds),
            })),
            Self::InvalidTransition { id, from, to } => error.with_details(json!({
                "replay_id": id,
                "from": from.as_str(),
                "to": to.as_str(),
            })),
            Self::TtlOutOfRange { seconds } => error.with_details(json!({
                "ttl_secs": seconds,
                "max_ttl_secs": MAX_TTL_SECONDS,
            })),
            Self::Repo(_) => error,
        }
    }
}

impl Display for ReplayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "replay `{id}` not found"),
            Self::AlreadyComplete { id, .. } => write!(f, "replay `{id}` is already complete"),
            Self::Cancelled { id, .. } => write!(f, "replay `{id}` was cancelled"),
            Self::Expired { id, .. } => write!(f, "replay `{id}` has expired"),
            Self::InvalidTransition { id, from, to } => {
                write!(f, "replay `{id}` cannot move from {from} to {to}")
            }
            Self::ConcurrentModification { id } => {
                write!(f, "replay `{id}` was modified concurrently; re-fetch and retry")
            }
            Self::TtlOutOfRange { seconds } => write!(
                f,
                "replay ttl of {seconds}s exceeds the maximum of {MAX_TTL_SECONDS}s"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ReplayError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<StoreError> for ReplayError {
    fn from(value: StoreError) -> Self {
        Self::Repo(RepoError::Store(value))
    }
}

pub struct ReplayService<S: KeyedStore> {
    records: KeyedRecordRepository<S, ReplayRecord>,
    clock: Arc<dyn Clock>,
    config: ReplayConfig,
}

impl<S: KeyedStore> ReplayService<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: ReplayConfig) -> Self {
        Self {
            records: KeyedRecordRepository::new(store, config.retention_secs),
            clock,
            config,
        }
    }

    /// Queues a replay expiring `ttl` (or the configured default) from now.
    ///
    /// The stored document outlives the deadline by the retention window, so
    /// an unexpired replay is always found.
    ///
    /// # Errors
    /// - `TtlOutOfRange` when `ttl` is longer than `MAX_TTL_SECONDS`.
    pub fn enqueue(&self, function: &str, ttl: Option<Ttl>) -> ReplayResult<ReplayRecord> {
        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.config.default_ttl);
        if !ttl.is_within_limit() {
            return Err(ReplayError::TtlOutOfRange {
                seconds: ttl.as_seconds(),
            });
        }
        let record = ReplayRecord::queued(
            Uuid::new_v4().to_string(),
            function,
            ttl,
            self.clock.now(),
        );
        self.insert(&record, ttl.as_seconds())?;
        info!(
            "event=replay_enqueue module=replay status=ok replay_id={} function={} ttl_secs={}",
            record.id,
            log_field(function),
            ttl.as_seconds()
        );
        Ok(record)
    }

    /// Stores a terminal record for an execution that was not queued.
    pub fn record_processed(
        &self,
        function: &str,
        result: Option<Value>,
    ) -> ReplayResult<ReplayRecord> {
        let mut record =
            ReplayRecord::processed(Uuid::new_v4().to_string(), function, self.clock.now());
        record.result = result;
        self.insert(&record, 0)?;
        debug!(
            "event=replay_processed module=replay status=ok replay_id={} function={}",
            record.id,
            log_field(function)
        );
        Ok(record)
    }

    /// Current record, persisting a due expiry first.
    pub fn status(&self, id: &str) -> ReplayResult<ReplayRecord> {
        let snapshot = self.load(id)?;
        if !self.is_due(&snapshot.record) {
            return Ok(snapshot.into_record());
        }
        match self.expire(&snapshot)? {
            Some(expired) => Ok(expired),
            // Someone else moved it first; their write is authoritative.
            None => Ok(self.load(id)?.into_record()),
        }
    }

    pub fn trigger(&self, id: &str) -> ReplayResult<ReplayRecord> {
        self.transition(id, ReplayStatus::Processing, |_| {})
    }

    pub fn complete(&self, id: &str, result: Value) -> ReplayResult<ReplayRecord> {
        self.transition(id, ReplayStatus::Completed, |record| {
            record.result = Some(result);
        })
    }

    pub fn fail(&self, id: &str, error: ErrorObject) -> ReplayResult<ReplayRecord> {
        self.transition(id, ReplayStatus::Failed, |record| {
            record.last_error = Some(error);
        })
    }

    pub fn cancel(&self, id: &str) -> ReplayResult<ReplayRecord> {
        self.transition(id, ReplayStatus::Cancelled, |_| {})
    }

    fn transition(
        &self,
        id: &str,
        next_status: ReplayStatus,
        apply: impl FnOnce(&mut ReplayRecord),
    ) -> ReplayResult<ReplayRecord> {
        let snapshot = self.guarded(id)?;
        let current = &snapshot.record;
        if !current.status.can_transition_to(next_status) {
            return Err(ReplayError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: next_status,
            });
        }

        let mut next = current.clone();
        apply(&mut next);
        next.advance(next_status, self.clock.now());
        if !self.records.replace(&snapshot, &next)? {
            return Err(ReplayError::ConcurrentModification { id: id.to_string() });
        }
        info!(
            "event=replay_transition module=replay status=ok replay_id={} to={} attempts={}",
            id, next_status, next.attempts
        );
        Ok(next)
    }

    /// Loads `id` and applies the guard chain.
    fn guarded(&self, id: &str) -> ReplayResult<Snapshot<ReplayRecord>> {
        let snapshot = self.load(id)?;
        let record = &snapshot.record;
        if record.status.is_complete() {
            return Err(ReplayError::AlreadyComplete {
                id: id.to_string(),
                completed_at: record.completed_at,
            });
        }
        if record.status == ReplayStatus::Cancelled {
            return Err(ReplayError::Cancelled {
                id: id.to_string(),
                cancelled_at: record.cancelled_at,
            });
        }
        if record.status == ReplayStatus::Expired {
            return Err(ReplayError::Expired {
                id: id.to_string(),
                expired_at: record.expired_at,
            });
        }
        if self.is_due(record) {
            let expired_at = record.expires_at;
            self.expire(&snapshot)?;
            return Err(ReplayError::Expired {
                id: id.to_string(),
                expired_at,
            });
        }
        Ok(snapshot)
    }

    fn is_due(&self, record: &ReplayRecord) -> bool {
        record.status == ReplayStatus::Queued && record.is_expired_at(self.clock.now())
    }

    /// Writes the queued -> expired transition. `None` when another writer won.
    fn expire(&self, snapshot: &Snapshot<ReplayRecord>) -> ReplayResult<Option<ReplayRecord>> {
        let mut next = snapshot.record.clone();
        next.advance(ReplayStatus::Expired, self.clock.now());
        if !self.records.replace(snapshot, &next)? {
            return Ok(None);
        }
        info!(
            "event=replay_transition module=replay status=ok replay_id={} to=expired",
            next.id
        );
        Ok(Some(next))
    }

    fn load(&self, id: &str) -> ReplayResult<Snapshot<ReplayRecord>> {
        self.records
            .load(id)?
            .ok_or_else(|| ReplayError::NotFound { id: id.to_string() })
    }

    fn insert(&self, record: &ReplayRecord, lead_secs: u64) -> ReplayResult<()> {
        if self.records.insert_with_lead(record, lead_secs)? {
            Ok(())
        } else {
            Err(ReplayError::ConcurrentModification {
                id: record.id.clone(),
            })
        }
    }
}

fn format_seconds(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
