//! Per-owner index of active operation ids.
//!
//! # Invariants
//! - Stored at `operation:owner:{owner}` as a JSON array without expiry.
//! - Writers replace the index only through compare-and-swap on the exact
//!   document they read; a missing index is created with `put_if_absent`.

use crate::repo::record_repo::{RepoError, RepoResult};
use crate::store::KeyedStore;

const OWNER_INDEX_PREFIX: &str = "operation:owner";

/// The index document as last read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnerIndexSnapshot {
    pub ids: Vec<String>,
    raw: Option<String>,
}

pub struct OwnerIndex<S: KeyedStore> {
    store: S,
}

impl<S: KeyedStore> OwnerIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn key(owner: &str) -> String {
        format!("{OWNER_INDEX_PREFIX}:{owner}")
    }

    pub fn load(&self, owner: &str) -> RepoResult<OwnerIndexSnapshot> {
        let key = Self::key(owner);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(OwnerIndexSnapshot::default());
        };
        let ids = serde_json::from_str(&raw).map_err(|err| RepoError::InvalidData {
            key,
            message: err.to_string(),
        })?;
        Ok(OwnerIndexSnapshot {
            ids,
            raw: Some(raw),
        })
    }

    /// Replaces the index with `ids` if it is unchanged since `current` was read.
    pub fn replace(
        &self,
        owner: &str,
        current: &OwnerIndexSnapshot,
        ids: &[String],
    ) -> RepoResult<bool> {
        let key = Self::key(owner);
        let raw = serde_json::to_string(ids).map_err(|err| RepoError::InvalidData {
            key: key.clone(),
            message: err.to_string(),
        })?;
        let written = match current.raw.as_deref() {
            Some(expected) => self.store.compare_and_swap(&key, expected, &raw)?,
            None => self.store.put_if_absent(&key, &raw, 0)?,
        };
        Ok(written)
    }
}
