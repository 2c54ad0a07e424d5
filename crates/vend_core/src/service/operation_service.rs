//! Asynchronous operation lifecycle.
//!
//! # Responsibility
//! - Create operations under a per-owner quota and drive them through the
//!   status graph with optimistic concurrency.
//!
//! # Invariants
//! - Every mutation names the version it was computed from; a mismatch is a
//!   `VersionConflict` and nothing is written.
//! - Terminal-state errors take precedence over version conflicts.
//! - The quota is checked and the owner index updated in one
//!   compare-and-swap, so concurrent creates cannot both slip under the limit.
//! - No retry happens here; callers re-fetch and decide.

use crate::clock::Clock;
use crate::config::OperationConfig;
use crate::logging::log_field;
use crate::model::operation::{OperationRecord, OperationStatus};
use crate::protocol::{ErrorCode, ErrorObject};
use crate::repo::{
    KeyedRecordRepository, OwnerIndex, RecordRepository, RepoError, Snapshot,
};
use crate::store::{KeyedStore, StoreError};
use log::{info, warn};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

const MAX_INDEX_ATTEMPTS: usize = 16;

pub type OperationResult<T> = Result<T, OperationError>;

#[derive(Debug)]
pub enum OperationError {
    NotFound {
        id: String,
    },
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },
    CannotCancel {
        id: String,
        status: OperationStatus,
    },
    InvalidTransition {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },
    QuotaExceeded {
        current: usize,
        limit: usize,
    },
    /// A live record already uses the freshly generated id.
    IdCollision {
        id: String,
    },
    /// The owner index kept changing underneath every attempt.
    IndexContended,
    Repo(RepoError),
}

impl OperationError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::OperationNotFound,
            Self::VersionConflict { .. } => ErrorCode::OperationVersionConflict,
            Self::CannotCancel { .. } => ErrorCode::OperationCannotCancel,
            Self::InvalidTransition { .. } => ErrorCode::OperationInvalidTransition,
            Self::QuotaExceeded { .. } => ErrorCode::OperationQuotaExceeded,
            Self::IdCollision { .. } => ErrorCode::OperationIdCollision,
            Self::IndexContended | Self::Repo(RepoError::Store(_)) => ErrorCode::StoreUnavailable,
            Self::Repo(RepoError::InvalidData { .. }) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::from_code(self.error_code(), self.to_string());
        match self {
            Self::NotFound { id } | Self::IdCollision { id } => {
                error.with_details(json!({ "operation_id": id }))
            }
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => error.with_details(json!({
                "operation_id": id,
                "expected_version": expected,
                "actual_version": actual,
            })),
            Self::CannotCancel { id, status } => error.with_details(json!({
                "operation_id": id,
                "status": status.as_str(),
            })),
            Self::InvalidTransition { id, from, to } => error.with_details(json!({
                "operation_id": id,
                "from": from.as_str(),
                "to": to.as_str(),
            })),
            Self::QuotaExceeded { current, limit } => {
                error.with_details(json!({ "current": current, "limit": limit }))
            }
            Self::IndexContended | Self::Repo(_) => error,
        }
    }
}

impl Display for OperationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "operation `{id}` not found"),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "operation `{id}` is at version {actual}, not {expected}; re-fetch and retry"
            ),
            Self::CannotCancel { id, status } => {
                write!(f, "operation `{id}` cannot be cancelled in status {status}")
            }
            Self::InvalidTransition { id, from, to } => {
                write!(f, "operation `{id}` cannot move from {from} to {to}")
            }
            Self::QuotaExceeded { current, limit } => write!(
                f,
                "owner has {current} active operations; limit is {limit}"
            ),
            Self::IdCollision { id } => {
                write!(f, "operation id `{id}` is already in use; retry the create")
            }
            Self::IndexContended => write!(f, "owner index is contended; retry later"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OperationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for OperationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<StoreError> for OperationError {
    fn from(value: StoreError) -> Self {
        Self::Repo(RepoError::Store(value))
    }
}

pub struct OperationService<S: KeyedStore + Clone> {
    records: KeyedRecordRepository<S, OperationRecord>,
    index: OwnerIndex<S>,
    clock: Arc<dyn Clock>,
    config: OperationConfig,
}

impl<S: KeyedStore + Clone> OperationService<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: OperationConfig) -> Self {
        Self {
            records: KeyedRecordRepository::new(store.clone(), config.retention_secs),
            index: OwnerIndex::new(store),
            clock,
            config,
        }
    }

    /// Creates a pending operation counted against `owner`'s quota.
    ///
    /// # Errors
    /// - `QuotaExceeded` when `owner` already has the maximum active operations.
    /// - `IdCollision` when the generated id is already stored.
    pub fn create(&self, owner: &str, function: &str) -> OperationResult<OperationRecord> {
        let record = OperationRecord::new(
            Uuid::new_v4().to_string(),
            owner,
            function,
            self.clock.now(),
        );
        if !self.records.insert(&record)? {
            return Err(OperationError::IdCollision { id: record.id });
        }

        match self.reserve_slot(owner, &record.id) {
            Ok(()) => {
                info!(
                    "event=operation_create module=operations status=ok operation_id={} function={}",
                    record.id,
                    log_field(function)
                );
                Ok(record)
            }
            Err(err) => {
                self.records.remove(&record.id)?;
                warn!(
                    "event=operation_create module=operations status=rejected code={} function={}",
                    err.error_code(),
                    log_field(function)
                );
                Err(err)
            }
        }
    }

    pub fn get(&self, id: &str) -> OperationResult<OperationRecord> {
        Ok(self.load(id)?.into_record())
    }

    pub fn start(&self, id: &str, expected_version: u64) -> OperationResult<OperationRecord> {
        self.transition(id, expected_version, OperationStatus::Processing, |_| {})
    }

    /// Records progress on a non-terminal operation; values above 100 clamp.
    pub fn update_progress(
        &self,
        id: &str,
        expected_version: u64,
        progress: u8,
    ) -> OperationResult<OperationRecord> {
        let snapshot = self.load(id)?;
        let current = &snapshot.record;
        if current.is_terminal() {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: current.status,
            });
        }
        check_version(current, expected_version)?;

        let mut next = current.clone();
        next.progress = Some(progress.min(100));
        next.touch(self.clock.now());
        self.persist(&snapshot, next)
    }

    pub fn complete(
        &self,
        id: &str,
        expected_version: u64,
        result: Value,
    ) -> OperationResult<OperationRecord> {
        self.transition(id, expected_version, OperationStatus::Completed, |record| {
            record.result = Some(result);
        })
    }

    pub fn fail(
        &self,
        id: &str,
        expected_version: u64,
        errors: Vec<ErrorObject>,
    ) -> OperationResult<OperationRecord> {
        self.transition(id, expected_version, OperationStatus::Failed, |record| {
            record.errors = errors;
        })
    }

    /// Cancels a pending or processing operation.
    ///
    /// # Errors
    /// - `CannotCancel` carrying the current status when already terminal.
    pub fn cancel(&self, id: &str, expected_version: u64) -> OperationResult<OperationRecord> {
        self.transition(id, expected_version, OperationStatus::Cancelled, |_| {})
    }

    /// Non-terminal operations of `owner`, oldest first.
    pub fn list_active(&self, owner: &str) -> OperationResult<Vec<OperationRecord>> {
        let snapshot = self.index.load(owner)?;
        let mut active = self.active_records(&snapshot.ids)?;
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    fn transition(
        &self,
        id: &str,
        expected_version: u64,
        next_status: OperationStatus,
        apply: impl FnOnce(&mut OperationRecord),
    ) -> OperationResult<OperationRecord> {
        let snapshot = self.load(id)?;
        let current = &snapshot.record;

        if current.is_terminal() {
            return Err(if next_status == OperationStatus::Cancelled {
                OperationError::CannotCancel {
                    id: id.to_string(),
                    status: current.status,
                }
            } else {
                OperationError::InvalidTransition {
                    id: id.to_string(),
                    from: current.status,
                    to: next_status,
                }
            });
        }
        check_version(current, expected_version)?;
        if !current.status.can_transition_to(next_status) {
            return Err(OperationError::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to: next_status,
            });
        }

        let mut next = current.clone();
        apply(&mut next);
        next.advance(next_status, self.clock.now());
        let owner = next.owner.clone();
        let stored = self.persist(&snapshot, next)?;

        info!(
            "event=operation_transition module=operations status=ok operation_id={} to={} version={}",
            id, next_status, stored.version
        );
        if stored.is_terminal() {
            self.release_slot(&owner, id)?;
        }
        Ok(stored)
    }

    fn persist(
        &self,
        snapshot: &Snapshot<OperationRecord>,
        next: OperationRecord,
    ) -> OperationResult<OperationRecord> {
        if self.records.replace(snapshot, &next)? {
            return Ok(next);
        }
        // Lost the race: report what the winner left behind.
        let actual = match self.records.load(&snapshot.record.id)? {
            Some(latest) => latest.record.version,
            None => {
                return Err(OperationError::NotFound {
                    id: snapshot.record.id.clone(),
                })
            }
        };
        Err(OperationError::VersionConflict {
            id: snapshot.record.id.clone(),
            expected: snapshot.record.version,
            actual,
        })
    }

    fn load(&self, id: &str) -> OperationResult<Snapshot<OperationRecord>> {
        self.records
            .load(id)?
            .ok_or_else(|| OperationError::NotFound { id: id.to_string() })
    }

    fn active_records(&self, ids: &[String]) -> OperationResult<Vec<OperationRecord>> {
        let mut active = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = self.records.load(id)? {
                if !snapshot.record.is_terminal() {
                    active.push(snapshot.into_record());
                }
            }
        }
        Ok(active)
    }

    fn reserve_slot(&self, owner: &str, id: &str) -> OperationResult<()> {
        let limit = self.config.max_active_per_owner;
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let snapshot = self.index.load(owner)?;
            let mut ids = self
                .active_records(&snapshot.ids)?
                .into_iter()
                .map(|record| record.id)
                .collect::<Vec<_>>();
            if ids.len() >= limit {
                return Err(OperationError::QuotaExceeded {
                    current: ids.len(),
                    limit,
                });
            }
            ids.push(id.to_string());
            if self.index.replace(owner, &snapshot, &ids)? {
                return Ok(());
            }
        }
        Err(OperationError::IndexContended)
    }

    fn release_slot(&self, owner: &str, id: &str) -> OperationResult<()> {
        for _ in 0..MAX_INDEX_ATTEMPTS {
            let snapshot = self.index.load(owner)?;
            if !snapshot.ids.iter().any(|existing| existing == id) {
                return Ok(());
            }
            let ids = snapshot
                .ids
                .iter()
                .filter(|existing| existing.as_str() != id)
                .cloned()
                .collect::<Vec<_>>();
            if self.index.replace(owner, &snapshot, &ids)? {
                return Ok(());
            }
        }
        // Stale ids are pruned by the next quota check.
        warn!(
            "event=operation_index module=operations status=contended operation_id={}",
            id
        );
        Ok(())
    }
}

fn check_version(record: &OperationRecord, expected: u64) -> OperationResult<()> {
    if record.version == expected {
        return Ok(());
    }
    Err(OperationError::VersionConflict {
        id: record.id.clone(),
        expected,
        actual: record.version,
    })
}
