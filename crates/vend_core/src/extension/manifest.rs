//! Extension manifest declaration and validation.

use crate::extension::event::LifecycleEvent;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Priority of one extension on one lifecycle event; lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub event: LifecycleEvent,
    pub priority: i32,
}

impl Subscription {
    pub fn new(event: LifecycleEvent, priority: i32) -> Self {
        Self { event, priority }
    }
}

/// Declarative extension manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionManifest {
    /// Stable identifier, e.g. `urn:vend:ext:atomic-lock`.
    pub urn: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    pub subscriptions: Vec<Subscription>,
    /// Runs on every request, invoked or not.
    pub is_global: bool,
    /// Handler failures abort the request instead of being logged and skipped.
    pub is_error_fatal: bool,
    pub summary: Option<String>,
}

impl ExtensionManifest {
    /// Non-global, fatal-on-error manifest without subscriptions.
    pub fn new(urn: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            version: version.into(),
            subscriptions: Vec::new(),
            is_global: false,
            is_error_fatal: true,
            summary: None,
        }
    }

    pub fn subscribe(mut self, event: LifecycleEvent, priority: i32) -> Self {
        self.subscriptions.push(Subscription::new(event, priority));
        self
    }

    pub fn global(mut self, is_global: bool) -> Self {
        self.is_global = is_global;
        self
    }

    pub fn error_fatal(mut self, is_error_fatal: bool) -> Self {
        self.is_error_fatal = is_error_fatal;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn priority_for(&self, event: LifecycleEvent) -> Option<i32> {
        self.subscriptions
            .iter()
            .find(|subscription| subscription.event == event)
            .map(|subscription| subscription.priority)
    }

    pub fn events(&self) -> impl Iterator<Item = LifecycleEvent> + '_ {
        self.subscriptions.iter().map(|subscription| subscription.event)
    }

    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if self.urn.trim().is_empty() {
            return Err(ManifestValidationError::EmptyUrn);
        }
        if !is_valid_urn(&self.urn) {
            return Err(ManifestValidationError::InvalidUrn(self.urn.clone()));
        }

        if self.version.trim().is_empty() {
            return Err(ManifestValidationError::EmptyVersion);
        }
        if !is_semver_triplet(self.version.trim()) {
            return Err(ManifestValidationError::InvalidVersion(
                self.version.clone(),
            ));
        }

        if self.subscriptions.is_empty() {
            return Err(ManifestValidationError::MissingSubscriptions);
        }
        let mut seen = BTreeSet::new();
        for subscription in &self.subscriptions {
            if !seen.insert(subscription.event) {
                return Err(ManifestValidationError::DuplicateSubscription(
                    subscription.event,
                ));
            }
        }
        Ok(())
    }
}

/// `urn:` followed by at least two lowercase segments joined by `:`.
fn is_valid_urn(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("urn:") else {
        return false;
    };
    let segments: Vec<&str> = rest.split(':').collect();
    segments.len() >= 2 && segments.iter().all(|segment| is_valid_segment(segment))
}

fn is_valid_segment(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'))
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    EmptyUrn,
    InvalidUrn(String),
    EmptyVersion,
    InvalidVersion(String),
    MissingSubscriptions,
    DuplicateSubscription(LifecycleEvent),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyUrn => write!(f, "manifest urn must not be empty"),
            Self::InvalidUrn(value) => write!(f, "manifest urn is invalid: {value}"),
            Self::EmptyVersion => write!(f, "manifest version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "manifest version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::MissingSubscriptions => {
                write!(f, "manifest must subscribe to at least one event")
            }
            Self::DuplicateSubscription(event) => {
                write!(f, "manifest subscribes to {event} more than once")
            }
        }
    }
}

impl Error for ManifestValidationError {}
