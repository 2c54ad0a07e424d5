//! Pure serializers from lifecycle records to extension output data.
//!
//! # Invariants
//! - No function here touches the store or the clock.
//! - Timestamps are RFC3339 UTC truncated to whole seconds, so a serialize and
//!   deserialize round trip reproduces every field exactly.

use crate::model::operation::{OperationRecord, OperationStatus};
use crate::model::replay::{ReplayRecord, ReplayStatus};
use crate::protocol::ExtensionOutput;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output of a freshly queued replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedReplayResponse {
    pub status: ReplayStatus,
    pub replay_id: String,
    #[serde(with = "rfc3339_seconds")]
    pub queued_at: DateTime<Utc>,
    #[serde(with = "rfc3339_seconds")]
    pub expires_at: DateTime<Utc>,
}

/// Output of an immediate, non-queued execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedReplayResponse {
    pub status: ReplayStatus,
    pub replay_id: String,
    #[serde(with = "rfc3339_seconds")]
    pub processed_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Full replay state for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutput {
    pub status: ReplayStatus,
    pub replay_id: String,
    #[serde(with = "rfc3339_seconds")]
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub expired_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Operation state attached to async responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutput {
    pub status: OperationStatus,
    pub operation_id: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(with = "rfc3339_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "rfc3339_seconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_seconds_opt")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

pub fn build_queued_response(record: &ReplayRecord) -> QueuedReplayResponse {
    QueuedReplayResponse {
        status: record.status,
        replay_id: record.id.clone(),
        queued_at: whole_seconds(record.queued_at),
        expires_at: whole_seconds(record.expires_at.unwrap_or(record.queued_at)),
    }
}

pub fn build_processed_response(record: &ReplayRecord) -> ProcessedReplayResponse {
    ProcessedReplayResponse {
        status: record.status,
        replay_id: record.id.clone(),
        processed_at: whole_seconds(record.completed_at.unwrap_or(record.queued_at)),
        attempts: record.attempts,
    }
}

pub fn replay_output(record: &ReplayRecord) -> ReplayOutput {
    ReplayOutput {
        status: record.status,
        replay_id: record.id.clone(),
        queued_at: whole_seconds(record.queued_at),
        expires_at: record.expires_at.map(whole_seconds),
        triggered_at: record.triggered_at.map(whole_seconds),
        completed_at: record.completed_at.map(whole_seconds),
        failed_at: record.failed_at.map(whole_seconds),
        cancelled_at: record.cancelled_at.map(whole_seconds),
        expired_at: record.expired_at.map(whole_seconds),
        attempts: record.attempts,
    }
}

pub fn operation_output(record: &OperationRecord) -> OperationOutput {
    OperationOutput {
        status: record.status,
        operation_id: record.id.clone(),
        version: record.version,
        progress: record.progress,
        created_at: whole_seconds(record.created_at),
        updated_at: whole_seconds(record.updated_at),
        started_at: record.started_at.map(whole_seconds),
        completed_at: record.completed_at.map(whole_seconds),
        cancelled_at: record.cancelled_at.map(whole_seconds),
    }
}

/// Wraps any serializable output as `{urn, data}`.
pub fn to_extension_output<T: Serialize>(urn: &str, output: &T) -> ExtensionOutput {
    let data = serde_json::to_value(output).unwrap_or(Value::Null);
    ExtensionOutput::new(urn, data)
}

fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(0)
}

mod rfc3339_seconds {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}

mod rfc3339_seconds_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        at: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => super::rfc3339_seconds::serialize(at, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super::rfc3339_seconds")] DateTime<Utc>);

        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(at)| at))
    }
}

#[cfg(test)]
mod tests {
    use super::{build_processed_response, operation_output, replay_output, to_extension_output};
    use crate::model::operation::{OperationRecord, OperationStatus};
    use crate::model::replay::{ReplayRecord, ReplayStatus};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn timestamps_drop_subseconds() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::milliseconds(750);
        let record = OperationRecord::new("op-1", "alice", "urn:acme:fn:export", at);
        let output = operation_output(&record);
        let value = serde_json::to_value(&output).expect("serialize");
        assert_eq!(value["created_at"], json!("2026-03-01T12:00:00Z"));
        assert_eq!(value["status"], json!("pending"));
        assert!(value.get("started_at").is_none());
        assert_eq!(output.status, OperationStatus::Pending);
    }

    #[test]
    fn processed_response_reports_single_attempt() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let record = ReplayRecord::processed("r-1", "urn:acme:fn:sync", at);
        let output = to_extension_output("urn:vend:ext:replay", &build_processed_response(&record));
        assert_eq!(
            serde_json::Value::Object(output.data),
            json!({
                "status": "processed",
                "replay_id": "r-1",
                "processed_at": "2026-03-01T12:00:00Z",
                "attempts": 1,
            })
        );
    }

    #[test]
    fn replay_output_round_trips_optional_fields() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut record = ReplayRecord::queued("r-2", "urn:acme:fn:sync", crate::model::ttl::Ttl::hours(1), at);
        record.advance(ReplayStatus::Processing, at + Duration::minutes(5));

        let output = replay_output(&record);
        let raw = serde_json::to_string(&output).expect("serialize");
        let parsed: super::ReplayOutput = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(parsed, output);
        assert_eq!(parsed.triggered_at, Some(at + Duration::minutes(5)));
        assert_eq!(parsed.completed_at, None);
    }
}
