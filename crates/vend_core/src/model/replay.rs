//! Replay records.
//!
//! # Responsibility
//! - Define the replay status graph, TTL clock and persisted record shape.
//!
//! # Invariants
//! - `Queued -> Processing -> {Completed | Failed}`, plus
//!   `Queued -> {Cancelled | Expired}`.
//! - `Processed` is terminal on creation.
//! - Entering a terminal status clears `expires_at`, so a record is never
//!   both complete and expired.
//! - `expires_at` is fixed once at enqueue time as `queued_at + ttl`.

use crate::model::ttl::Ttl;
use crate::protocol::ErrorObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Lifecycle status of one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
    /// Executed immediately instead of being queued.
    Processed,
}

impl ReplayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Processed => "processed",
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired | Self::Processed => {
                true
            }
            Self::Queued | Self::Processing => false,
        }
    }

    pub fn is_in_progress(self) -> bool {
        !self.is_terminal()
    }

    /// Terminal with a successful outcome.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Completed | Self::Processed)
    }

    pub fn can_transition_to(self, next: ReplayStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Cancelled)
                | (Self::Queued, Self::Expired)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl Display for ReplayStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boundary-inclusive expiry test.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

/// One tracked replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub id: String,
    pub function: String,
    pub status: ReplayStatus,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorObject>,
}

impl ReplayRecord {
    /// Creates a queued record expiring at `now + ttl`, saturating at the
    /// latest representable instant.
    pub fn queued(
        id: impl Into<String>,
        function: impl Into<String>,
        ttl: Ttl,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            status: ReplayStatus::Queued,
            version: 1,
            ttl: Some(ttl),
            queued_at: now,
            expires_at: Some(ttl.deadline_from(now).unwrap_or(DateTime::<Utc>::MAX_UTC)),
            triggered_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            expired_at: None,
            attempts: 0,
            result: None,
            last_error: None,
        }
    }

    /// Creates a record for an immediate execution; terminal on creation.
    pub fn processed(id: impl Into<String>, function: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            status: ReplayStatus::Processed,
            version: 1,
            ttl: None,
            queued_at: now,
            expires_at: None,
            triggered_at: Some(now),
            completed_at: Some(now),
            failed_at: None,
            cancelled_at: None,
            expired_at: None,
            attempts: 1,
            result: None,
            last_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the TTL clock has run out at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => is_expired(expires_at, now),
            None => false,
        }
    }

    /// Timestamp of the terminal transition, if any.
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            ReplayStatus::Completed | ReplayStatus::Processed => self.completed_at,
            ReplayStatus::Failed => self.failed_at,
            ReplayStatus::Cancelled => self.cancelled_at,
            ReplayStatus::Expired => self.expired_at,
            ReplayStatus::Queued | ReplayStatus::Processing => None,
        }
    }

    /// Moves to `next`, stamping timestamps and bumping the version.
    ///
    /// Callers validate the edge with `ReplayStatus::can_transition_to` first.
    pub(crate) fn advance(&mut self, next: ReplayStatus, at: DateTime<Utc>) {
        match next {
            ReplayStatus::Processing => {
                self.triggered_at = Some(at);
                self.attempts = self.attempts.saturating_add(1);
            }
            ReplayStatus::Completed | ReplayStatus::Processed => self.completed_at = Some(at),
            ReplayStatus::Failed => self.failed_at = Some(at),
            ReplayStatus::Cancelled => self.cancelled_at = Some(at),
            ReplayStatus::Expired => self.expired_at = Some(self.expires_at.unwrap_or(at)),
            ReplayStatus::Queued => {}
        }
        if next.is_terminal() {
            self.expires_at = None;
        }
        self.status = next;
        self.version += 1;
    }
}
