//! Cooperative cancellation tokens.
//!
//! # Responsibility
//! - Register, inspect, cancel and clean up caller-chosen tokens.
//!
//! # Invariants
//! - A token moves `active -> cancelled` at most once and never back.
//! - Expired tokens behave exactly like tokens that were never registered.
//! - Tokens with characters outside `[A-Za-z0-9_.:-]` or longer than the
//!   configured bound are never stored; `register` reports `Ok(false)`.
//! - Token values reach logs and error details only through `mask_secret`.

use crate::config::CancellationConfig;
use crate::model::cancellation::CancellationState;
use crate::model::ttl::Ttl;
use crate::protocol::{mask_secret, ErrorCode, ErrorObject};
use crate::store::{KeyedStore, StoreError};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};

const TOKEN_KEY_PREFIX: &str = "cancellation";

static TOKEN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("token regex must compile"));

pub type CancellationResult<T> = Result<T, CancellationError>;

#[derive(Debug)]
pub enum CancellationError {
    TokenRequired,
    /// The request's token was cancelled before the function ran.
    Cancelled { token: String },
    Store(StoreError),
}

impl CancellationError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::TokenRequired => ErrorCode::CancellationTokenRequired,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
            Self::Store(_) => ErrorCode::StoreUnavailable,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::from_code(self.error_code(), self.to_string());
        match self {
            Self::Cancelled { token } => {
                error.with_details(json!({ "token": mask_secret(token) }))
            }
            Self::TokenRequired | Self::Store(_) => error,
        }
    }
}

impl Display for CancellationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenRequired => write!(f, "cancellation token is required"),
            Self::Cancelled { .. } => write!(f, "request was cancelled"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CancellationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for CancellationError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub struct CancellationService<S: KeyedStore> {
    store: S,
    config: CancellationConfig,
}

impl<S: KeyedStore> CancellationService<S> {
    pub fn new(store: S, config: CancellationConfig) -> Self {
        Self { store, config }
    }

    /// Registers `token` as active with the configured TTL.
    pub fn register(&self, token: &str) -> CancellationResult<bool> {
        self.register_with_ttl(token, Ttl::seconds(self.config.token_ttl_secs))
    }

    /// Registers `token` as active for `ttl`.
    ///
    /// Returns whether the token is now tracked. An already tracked token
    /// keeps its current state, so a cancel that raced ahead is not undone.
    ///
    /// # Errors
    /// - `TokenRequired` for an empty or blank token.
    pub fn register_with_ttl(&self, token: &str, ttl: Ttl) -> CancellationResult<bool> {
        if token.trim().is_empty() {
            return Err(CancellationError::TokenRequired);
        }
        if !self.is_well_formed(token) {
            debug!(
                "event=cancellation_register module=cancellation status=skipped reason=token_shape token={}",
                mask_secret(token)
            );
            return Ok(false);
        }

        let written = self.store.put_if_absent(
            &Self::key(token),
            CancellationState::Active.as_str(),
            ttl.as_seconds().max(1),
        )?;
        debug!(
            "event=cancellation_register module=cancellation status={} token={}",
            if written { "ok" } else { "exists" },
            mask_secret(token)
        );
        Ok(true)
    }

    /// Current state, `None` when unknown or expired.
    pub fn state(&self, token: &str) -> CancellationResult<Option<CancellationState>> {
        if !self.is_well_formed(token) {
            return Ok(None);
        }
        Ok(self
            .store
            .get(&Self::key(token))?
            .as_deref()
            .and_then(CancellationState::parse))
    }

    pub fn is_active(&self, token: &str) -> CancellationResult<bool> {
        Ok(self.state(token)? == Some(CancellationState::Active))
    }

    pub fn is_cancelled(&self, token: &str) -> CancellationResult<bool> {
        Ok(self.state(token)? == Some(CancellationState::Cancelled))
    }

    /// Flips an active token to cancelled.
    ///
    /// Returns `true` whenever the token is tracked, including repeat calls on
    /// an already cancelled token; `false` when unknown or expired.
    pub fn cancel(&self, token: &str) -> CancellationResult<bool> {
        if !self.is_well_formed(token) {
            return Ok(false);
        }
        let key = Self::key(token);
        let cancelled = match self.state(token)? {
            None => false,
            Some(CancellationState::Cancelled) => true,
            Some(CancellationState::Active) => {
                self.store.compare_and_swap(
                    &key,
                    CancellationState::Active.as_str(),
                    CancellationState::Cancelled.as_str(),
                )? || self.is_cancelled(token)?
            }
        };
        info!(
            "event=cancellation_cancel module=cancellation status={} token={}",
            if cancelled { "ok" } else { "unknown" },
            mask_secret(token)
        );
        Ok(cancelled)
    }

    /// Forgets `token`. Safe to call any number of times.
    pub fn cleanup(&self, token: &str) -> CancellationResult<()> {
        if !self.is_well_formed(token) {
            return Ok(());
        }
        let removed = self.store.delete(&Self::key(token))?;
        debug!(
            "event=cancellation_cleanup module=cancellation status=ok removed={} token={}",
            removed,
            mask_secret(token)
        );
        Ok(())
    }

    fn is_well_formed(&self, token: &str) -> bool {
        token.len() <= self.config.max_token_len && TOKEN_SHAPE.is_match(token)
    }

    fn key(token: &str) -> String {
        format!("{TOKEN_KEY_PREFIX}:{token}")
    }
}
