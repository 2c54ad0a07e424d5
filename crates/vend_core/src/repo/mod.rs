//! Record repositories over the keyed store.
//!
//! # Responsibility
//! - Define storage contracts for lifecycle records.
//! - Keep document encoding and store key layout out of the services.
//!
//! # Invariants
//! - Every mutation of a stored record is a compare-and-swap against the
//!   exact document previously read.

pub mod owner_index;
pub mod record_repo;

pub use owner_index::{OwnerIndex, OwnerIndexSnapshot};
pub use record_repo::{
    KeyedRecordRepository, RecordRepository, RepoError, RepoResult, Snapshot, StoredRecord,
};
