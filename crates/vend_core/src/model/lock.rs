//! Distributed lock records.
//!
//! # Responsibility
//! - Define lock scope, scoped store keys and the held-lock record.
//!
//! # Invariants
//! - Function scope namespaces keys by function URN; global scope does not.
//! - A scoped key maps to at most one live owner in the store.
//! - Metadata keys live under `lockmeta:`, which no primary key can start
//!   with, so one lock's metadata never lands on another lock's key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

const LOCK_KEY_PREFIX: &str = "lock";
const LOCK_META_PREFIX: &str = "lockmeta";

/// Namespace of a lock key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    #[default]
    Function,
    Global,
}

impl LockScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Global => "global",
        }
    }
}

/// Effective store key of one lock, plus the caller key it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    key: String,
    scope: LockScope,
    scoped: String,
}

impl LockKey {
    /// Builds `lock:{function}:{key}` or `lock:{key}` depending on scope.
    pub fn scoped(scope: LockScope, function_urn: &str, key: &str) -> Self {
        let scoped = match scope {
            LockScope::Function => format!("{LOCK_KEY_PREFIX}:{function_urn}:{key}"),
            LockScope::Global => format!("{LOCK_KEY_PREFIX}:{key}"),
        };
        Self {
            key: key.to_string(),
            scope,
            scoped,
        }
    }

    /// Caller-chosen key before scoping.
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Store key.
    pub fn as_str(&self) -> &str {
        self.scoped.as_str()
    }

    pub fn owner_key(&self) -> String {
        self.metadata_key("owner")
    }

    pub fn acquired_at_key(&self) -> String {
        self.metadata_key("acquired_at")
    }

    pub fn expires_at_key(&self) -> String {
        self.metadata_key("expires_at")
    }

    fn metadata_key(&self, field: &str) -> String {
        format!("{LOCK_META_PREFIX}:{}:{field}", self.scoped)
    }

    pub(crate) fn metadata_keys(&self) -> [String; 3] {
        [self.owner_key(), self.acquired_at_key(), self.expires_at_key()]
    }
}

impl Display for LockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.key, self.scope.as_str())
    }
}

/// A successfully acquired lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub key: LockKey,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn scope(&self) -> LockScope {
        self.key.scope()
    }
}

/// Owner proof rebuilt from the store for out-of-band release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub key: LockKey,
    pub owner: String,
}

/// Point-in-time lock state answered from metadata keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Seconds until expiry, clamped at zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_remaining: Option<u64>,
}

impl LockStatus {
    pub fn unlocked() -> Self {
        Self {
            locked: false,
            owner: None,
            acquired_at: None,
            expires_at: None,
            ttl_remaining: None,
        }
    }
}
