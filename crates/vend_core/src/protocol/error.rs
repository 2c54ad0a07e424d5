//! Structured protocol error model.
//!
//! # Responsibility
//! - Define the `ErrorObject` shape consumed by the transport boundary.
//! - Own the stable machine-code catalogue for core failures.
//!
//! # Invariants
//! - An error source is a JSON pointer XOR a byte position, never both.
//! - Error objects are immutable once built; builders consume `self`.
//! - Secret values (owner tokens, cancellation tokens) only appear masked.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

const MASK_VISIBLE_CHARS: usize = 4;
const MASK_SUFFIX: &str = "****";

/// Stable machine codes for failures raised by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    LockKeyRequired,
    LockTtlRequired,
    LockTtlOutOfRange,
    LockAcquisitionFailed,
    LockTimeout,
    LockOwnershipMismatch,
    LockNotFound,
    CancellationTokenRequired,
    Cancelled,
    OperationNotFound,
    OperationVersionConflict,
    OperationCannotCancel,
    OperationInvalidTransition,
    OperationQuotaExceeded,
    OperationIdCollision,
    ReplayNotFound,
    ReplayAlreadyComplete,
    ReplayCancelled,
    ReplayExpired,
    ReplayInvalidTransition,
    ReplayConcurrentModification,
    ReplayTtlOutOfRange,
    InvalidExtensionOptions,
    StoreUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LockKeyRequired => "LOCK_KEY_REQUIRED",
            Self::LockTtlRequired => "LOCK_TTL_REQUIRED",
            Self::LockTtlOutOfRange => "LOCK_TTL_OUT_OF_RANGE",
            Self::LockAcquisitionFailed => "LOCK_ACQUISITION_FAILED",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::LockOwnershipMismatch => "LOCK_OWNERSHIP_MISMATCH",
            Self::LockNotFound => "LOCK_NOT_FOUND",
            Self::CancellationTokenRequired => "CANCELLATION_TOKEN_REQUIRED",
            Self::Cancelled => "CANCELLED",
            Self::OperationNotFound => "OPERATION_NOT_FOUND",
            Self::OperationVersionConflict => "OPERATION_VERSION_CONFLICT",
            Self::OperationCannotCancel => "OPERATION_CANNOT_CANCEL",
            Self::OperationInvalidTransition => "OPERATION_INVALID_TRANSITION",
            Self::OperationQuotaExceeded => "OPERATION_QUOTA_EXCEEDED",
            Self::OperationIdCollision => "OPERATION_ID_COLLISION",
            Self::ReplayNotFound => "REPLAY_NOT_FOUND",
            Self::ReplayAlreadyComplete => "REPLAY_ALREADY_COMPLETE",
            Self::ReplayCancelled => "REPLAY_CANCELLED",
            Self::ReplayExpired => "REPLAY_EXPIRED",
            Self::ReplayInvalidTransition => "REPLAY_INVALID_TRANSITION",
            Self::ReplayConcurrentModification => "REPLAY_CONCURRENT_MODIFICATION",
            Self::ReplayTtlOutOfRange => "REPLAY_TTL_OUT_OF_RANGE",
            Self::InvalidExtensionOptions => "INVALID_EXTENSION_OPTIONS",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the request a failure originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawErrorSource", into = "RawErrorSource")]
pub enum ErrorSource {
    /// RFC 6901 JSON pointer into the request document.
    Pointer(String),
    /// Byte offset into the raw request payload.
    Position(u64),
}

impl ErrorSource {
    pub fn pointer(value: impl Into<String>) -> Self {
        Self::Pointer(value.into())
    }

    pub fn position(offset: u64) -> Self {
        Self::Position(offset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawErrorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
}

impl TryFrom<RawErrorSource> for ErrorSource {
    type Error = ErrorSourceShapeError;

    fn try_from(value: RawErrorSource) -> Result<Self, Self::Error> {
        match (value.pointer, value.position) {
            (Some(pointer), None) => Ok(Self::Pointer(pointer)),
            (None, Some(position)) => Ok(Self::Position(position)),
            (Some(_), Some(_)) => Err(ErrorSourceShapeError::Both),
            (None, None) => Err(ErrorSourceShapeError::Neither),
        }
    }
}

impl From<ErrorSource> for RawErrorSource {
    fn from(value: ErrorSource) -> Self {
        match value {
            ErrorSource::Pointer(pointer) => Self {
                pointer: Some(pointer),
                position: None,
            },
            ErrorSource::Position(position) => Self {
                pointer: None,
                position: Some(position),
            },
        }
    }
}

/// Rejected error-source shapes on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSourceShapeError {
    Both,
    Neither,
}

impl Display for ErrorSourceShapeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Both => write!(f, "error source must not carry both pointer and position"),
            Self::Neither => write!(f, "error source must carry a pointer or a position"),
        }
    }
}

impl Error for ErrorSourceShapeError {}

/// One reported failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
}

impl ErrorObject {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.as_str(), message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Returns whether this object carries the given core code.
    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

impl Display for ErrorObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Masks a secret for echoing in error details and logs.
///
/// Keeps at most the first four characters; short values are fully masked.
pub fn mask_secret(value: &str) -> String {
    let count = value.chars().count();
    if count <= MASK_VISIBLE_CHARS {
        return MASK_SUFFIX.to_string();
    }
    let mut masked = value.chars().take(MASK_VISIBLE_CHARS).collect::<String>();
    masked.push_str(MASK_SUFFIX);
    masked
}
