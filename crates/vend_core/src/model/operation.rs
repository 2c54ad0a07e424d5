//! Asynchronous operation records.
//!
//! # Responsibility
//! - Define the operation status graph and the persisted record shape.
//!
//! # Invariants
//! - `Pending -> Processing -> {Completed | Failed}`, plus
//!   `{Pending, Processing} -> Cancelled`.
//! - No transition leaves a terminal status.
//! - `version` starts at 1 and grows by one on every mutation.

use crate::protocol::ErrorObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Lifecycle status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            Self::Completed | Self::Failed | Self::Cancelled => true,
            Self::Pending | Self::Processing => false,
        }
    }

    pub fn is_in_progress(self) -> bool {
        !self.is_terminal()
    }

    /// Returns whether `self -> next` is an edge of the status graph.
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
        )
    }
}

impl Display for OperationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked asynchronous job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    /// Quota bucket the operation counts against.
    pub owner: String,
    pub function: String,
    pub status: OperationStatus,
    pub version: u64,
    /// Percent complete, `0..=100`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorObject>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    /// Creates a pending record at version 1.
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        function: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            function: function.into(),
            status: OperationStatus::Pending,
            version: 1,
            progress: None,
            result: None,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `next`, stamping the matching timestamp and bumping the version.
    ///
    /// Callers validate the edge with `OperationStatus::can_transition_to` first.
    pub(crate) fn advance(&mut self, next: OperationStatus, at: DateTime<Utc>) {
        match next {
            OperationStatus::Processing => self.started_at = Some(at),
            OperationStatus::Completed | OperationStatus::Failed => {
                self.completed_at = Some(at);
                if next == OperationStatus::Completed {
                    self.progress = Some(100);
                }
            }
            OperationStatus::Cancelled => self.cancelled_at = Some(at),
            OperationStatus::Pending => {}
        }
        self.status = next;
        self.touch(at);
    }

    /// Bumps version and `updated_at` for a non-status mutation.
    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = at;
    }
}
