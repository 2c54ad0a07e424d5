//! Request and response envelopes.
//!
//! # Responsibility
//! - Define the immutable request shape handed to the pipeline.
//! - Define the response shape the pipeline enriches and returns.
//!
//! # Invariants
//! - A response carries a result XOR an error list.
//! - Response extension outputs keep contribution order.

use crate::protocol::error::ErrorObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol name carried by every envelope.
pub const PROTOCOL_NAME: &str = "vend";
/// Protocol version carried by every envelope.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Protocol identifier and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub name: String,
    pub version: String,
}

impl ProtocolInfo {
    pub fn current() -> Self {
        Self {
            name: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

impl Default for ProtocolInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// Target function and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallData {
    /// Function URN, e.g. `urn:acme:fn:orders.ship`.
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Request-side extension activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionInvocation {
    pub urn: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ExtensionInvocation {
    /// Builds an invocation; non-object `options` yield an empty map.
    pub fn new(urn: impl Into<String>, options: Value) -> Self {
        Self {
            urn: urn.into(),
            options: into_object(options),
        }
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }
}

/// Response-side extension data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionOutput {
    pub urn: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ExtensionOutput {
    /// Builds an output; non-object `data` yields an empty map.
    pub fn new(urn: impl Into<String>, data: Value) -> Self {
        Self {
            urn: urn.into(),
            data: into_object(data),
        }
    }
}

/// One RPC call as handed over by the transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub protocol: ProtocolInfo,
    pub id: String,
    pub call: CallData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<ExtensionInvocation>,
}

impl RequestEnvelope {
    /// Builds a request for `function`; non-object `arguments` yield an empty map.
    pub fn new(id: impl Into<String>, function: impl Into<String>, arguments: Value) -> Self {
        Self {
            protocol: ProtocolInfo::current(),
            id: id.into(),
            call: CallData {
                function: function.into(),
                version: None,
                arguments: into_object(arguments),
            },
            extensions: Vec::new(),
        }
    }

    pub fn with_function_version(mut self, version: impl Into<String>) -> Self {
        self.call.version = Some(version.into());
        self
    }

    pub fn with_extension(mut self, invocation: ExtensionInvocation) -> Self {
        self.extensions.push(invocation);
        self
    }

    pub fn function(&self) -> &str {
        self.call.function.as_str()
    }

    /// Returns the first invocation for `urn`.
    pub fn extension(&self, urn: &str) -> Option<&ExtensionInvocation> {
        self.extensions.iter().find(|invocation| invocation.urn == urn)
    }

    /// Returns the index of the first invocation for `urn`.
    pub fn extension_position(&self, urn: &str) -> Option<usize> {
        self.extensions
            .iter()
            .position(|invocation| invocation.urn == urn)
    }
}

/// Result-or-errors body of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Result(Value),
    Errors(Vec<ErrorObject>),
}

/// One RPC reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub protocol: ProtocolInfo,
    pub id: String,
    #[serde(flatten)]
    outcome: ResponseOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extensions: Vec<ExtensionOutput>,
}

impl ResponseEnvelope {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            protocol: ProtocolInfo::current(),
            id: id.into(),
            outcome: ResponseOutcome::Result(result),
            extensions: Vec::new(),
        }
    }

    /// Builds a failure response; an empty list is normalized to one internal error.
    pub fn failure(id: impl Into<String>, errors: Vec<ErrorObject>) -> Self {
        let errors = if errors.is_empty() {
            vec![ErrorObject::new("INTERNAL_ERROR", "failure response without errors")]
        } else {
            errors
        };
        Self {
            protocol: ProtocolInfo::current(),
            id: id.into(),
            outcome: ResponseOutcome::Errors(errors),
            extensions: Vec::new(),
        }
    }

    pub fn from_error(id: impl Into<String>, error: ErrorObject) -> Self {
        Self::failure(id, vec![error])
    }

    pub fn outcome(&self) -> &ResponseOutcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Result(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            ResponseOutcome::Result(value) => Some(value),
            ResponseOutcome::Errors(_) => None,
        }
    }

    pub fn errors(&self) -> &[ErrorObject] {
        match &self.outcome {
            ResponseOutcome::Result(_) => &[],
            ResponseOutcome::Errors(errors) => errors.as_slice(),
        }
    }

    pub fn extensions(&self) -> &[ExtensionOutput] {
        self.extensions.as_slice()
    }

    /// Returns the first output contributed by `urn`.
    pub fn extension(&self, urn: &str) -> Option<&ExtensionOutput> {
        self.extensions.iter().find(|output| output.urn == urn)
    }

    /// Appends one extension output after every earlier contribution.
    pub fn push_extension(&mut self, output: ExtensionOutput) {
        self.extensions.push(output);
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtensionInvocation, ExtensionOutput, RequestEnvelope, ResponseEnvelope};
    use crate::protocol::error::{ErrorCode, ErrorObject};
    use serde_json::json;

    #[test]
    fn request_parses_wire_shape() {
        let request: RequestEnvelope = serde_json::from_value(json!({
            "protocol": { "name": "vend", "version": "0.1.0" },
            "id": "req-1",
            "call": { "function": "urn:acme:fn:orders.ship", "arguments": { "order": 42 } },
            "extensions": [
                { "urn": "urn:vend:ext:atomic-lock", "options": { "key": "orders:42" } }
            ]
        }))
        .expect("request parses");

        assert_eq!(request.function(), "urn:acme:fn:orders.ship");
        assert_eq!(request.extension_position("urn:vend:ext:atomic-lock"), Some(0));
        assert_eq!(
            request
                .extension("urn:vend:ext:atomic-lock")
                .and_then(|inv| inv.option("key")),
            Some(&json!("orders:42"))
        );
    }

    #[test]
    fn response_serializes_result_or_errors_only() {
        let ok = serde_json::to_value(ResponseEnvelope::success("1", json!({ "ok": true })))
            .expect("success serializes");
        assert_eq!(ok["result"], json!({ "ok": true }));
        assert!(ok.get("errors").is_none());

        let failed = serde_json::to_value(ResponseEnvelope::from_error(
            "1",
            ErrorObject::from_code(ErrorCode::Cancelled, "cancelled"),
        ))
        .expect("failure serializes");
        assert!(failed.get("result").is_none());
        assert_eq!(failed["errors"][0]["code"], json!("CANCELLED"));
    }

    #[test]
    fn response_roundtrips_through_json() {
        let mut response = ResponseEnvelope::success("abc", json!([1, 2]));
        response.push_extension(ExtensionOutput::new("urn:vend:ext:a", json!({ "n": 1 })));
        response.push_extension(ExtensionOutput::new("urn:vend:ext:b", json!({ "n": 2 })));

        let text = serde_json::to_string(&response).expect("response serializes");
        let parsed: ResponseEnvelope = serde_json::from_str(&text).expect("response parses");
        assert_eq!(parsed, response);
        assert_eq!(parsed.extensions()[0].urn, "urn:vend:ext:a");
        assert_eq!(parsed.extensions()[1].urn, "urn:vend:ext:b");
    }

    #[test]
    fn empty_failure_is_normalized() {
        let response = ResponseEnvelope::failure("x", vec![]);
        assert_eq!(response.errors().len(), 1);
        assert!(!response.is_success());
    }

    #[test]
    fn non_object_options_become_empty() {
        let invocation = ExtensionInvocation::new("urn:vend:ext:x", json!("nope"));
        assert!(invocation.options.is_empty());
    }
}
