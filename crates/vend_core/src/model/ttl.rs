//! Time-to-live value type shared by locks and replay records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Unit accepted in `{value, unit}` TTL declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    pub fn seconds(self) -> u64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 60 * 60,
            Self::Day => 24 * 60 * 60,
        }
    }
}

/// Longest TTL accepted from a request: 100 years of days.
pub const MAX_TTL_SECONDS: u64 = 36_500 * 24 * 60 * 60;

/// Duration expressed as `{value, unit}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ttl {
    pub value: u64,
    pub unit: TimeUnit,
}

impl Ttl {
    pub fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn seconds(value: u64) -> Self {
        Self::new(value, TimeUnit::Second)
    }

    pub fn minutes(value: u64) -> Self {
        Self::new(value, TimeUnit::Minute)
    }

    pub fn hours(value: u64) -> Self {
        Self::new(value, TimeUnit::Hour)
    }

    pub fn days(value: u64) -> Self {
        Self::new(value, TimeUnit::Day)
    }

    /// Total length in seconds, saturating on overflow.
    pub fn as_seconds(self) -> u64 {
        self.value.saturating_mul(self.unit.seconds())
    }

    pub fn as_std_duration(self) -> std::time::Duration {
        std::time::Duration::from_secs(self.as_seconds())
    }

    pub fn is_zero(self) -> bool {
        self.value == 0
    }

    pub fn is_within_limit(self) -> bool {
        self.as_seconds() <= MAX_TTL_SECONDS
    }

    /// `now + self`, or `None` when the result is not a representable instant.
    pub fn deadline_from(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.as_seconds()).ok()?;
        now.checked_add_signed(Duration::try_seconds(secs)?)
    }
}
