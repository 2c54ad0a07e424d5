//! Domain records for locks, cancellation tokens, operations and replays.
//!
//! # Responsibility
//! - Define the data structures persisted in the keyed store.
//! - Encode status graphs as exhaustive enums with helper predicates.
//!
//! # Invariants
//! - Status transitions never leave a terminal state.
//! - Records carry a version counter bumped on every mutation.

pub mod cancellation;
pub mod lock;
pub mod operation;
pub mod replay;
pub mod ttl;
