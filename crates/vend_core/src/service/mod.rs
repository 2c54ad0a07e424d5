//! Core use-case services.
//!
//! # Responsibility
//! - Implement lock, cancellation and lifecycle semantics over the keyed
//!   store, independent of the extension pipeline.
//! - Map every failure to one error enum per service with a stable code.

pub mod cancellation_service;
pub mod lock_service;
pub mod operation_service;
pub mod replay_service;

pub use cancellation_service::{CancellationError, CancellationResult, CancellationService};
pub use lock_service::{LockError, LockRequest, LockResult, LockService};
pub use operation_service::{OperationError, OperationResult, OperationService};
pub use replay_service::{ReplayError, ReplayResult, ReplayService};
