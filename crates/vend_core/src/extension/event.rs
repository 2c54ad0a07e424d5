//! Lifecycle events delivered to extension handlers.
//!
//! # Responsibility
//! - Name the four lifecycle points and the per-request state handlers share.
//! - Expose the two handler-side mutations: set a response, stop propagation.
//!
//! # Invariants
//! - A `RequestContext` lives for exactly one request and is never shared.
//! - Only `ExecutingFunction` and `FunctionExecuted` carry an invocation.

use crate::protocol::{ErrorObject, ExtensionInvocation, RequestEnvelope, ResponseEnvelope};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One of the four ordered lifecycle points of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    RequestValidated,
    ExecutingFunction,
    FunctionExecuted,
    SendingResponse,
}

impl LifecycleEvent {
    /// Every event in dispatch order.
    pub const ALL: [LifecycleEvent; 4] = [
        Self::RequestValidated,
        Self::ExecutingFunction,
        Self::FunctionExecuted,
        Self::SendingResponse,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestValidated => "request_validated",
            Self::ExecutingFunction => "executing_function",
            Self::FunctionExecuted => "function_executed",
            Self::SendingResponse => "sending_response",
        }
    }

    /// Events whose short-circuit response replaces function execution.
    pub fn precedes_execution(self) -> bool {
        matches!(self, Self::RequestValidated | Self::ExecutingFunction)
    }

    pub fn carries_invocation(self) -> bool {
        matches!(self, Self::ExecutingFunction | Self::FunctionExecuted)
    }
}

impl Display for LifecycleEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler verdict for the rest of the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    /// Skip the remaining handlers of this event.
    Stop,
}

/// Failure raised by one extension handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionError {
    pub urn: String,
    pub error: ErrorObject,
}

impl ExtensionError {
    pub fn new(urn: impl Into<String>, error: ErrorObject) -> Self {
        Self {
            urn: urn.into(),
            error,
        }
    }
}

impl Display for ExtensionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "extension `{}` failed: {}", self.urn, self.error)
    }
}

impl Error for ExtensionError {}

/// Typed per-request state slots, one per Rust type.
///
/// Each extension stores its own private type, so slots never collide.
#[derive(Default)]
pub struct RequestContext {
    slots: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.slots
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.slots
            .get(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.slots
            .get_mut(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        self.slots
            .remove(&TypeId::of::<T>())
            .and_then(|slot| slot.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T: Any + Send>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<T>())
    }
}

/// What one handler sees while one lifecycle event runs.
pub struct ExtensionEvent<'a> {
    kind: LifecycleEvent,
    request: &'a RequestEnvelope,
    invocation: Option<&'a ExtensionInvocation>,
    context: &'a mut RequestContext,
    response: &'a mut Option<ResponseEnvelope>,
}

impl<'a> ExtensionEvent<'a> {
    pub(crate) fn new(
        kind: LifecycleEvent,
        request: &'a RequestEnvelope,
        invocation: Option<&'a ExtensionInvocation>,
        context: &'a mut RequestContext,
        response: &'a mut Option<ResponseEnvelope>,
    ) -> Self {
        let invocation = invocation.filter(|_| kind.carries_invocation());
        Self {
            kind,
            request,
            invocation,
            context,
            response,
        }
    }

    pub fn kind(&self) -> LifecycleEvent {
        self.kind
    }

    pub fn request(&self) -> &'a RequestEnvelope {
        self.request
    }

    /// Invocation of the handling extension; `None` outside the middle events
    /// and for global extensions the request did not name.
    pub fn invocation(&self) -> Option<&'a ExtensionInvocation> {
        self.invocation
    }

    pub fn context(&self) -> &RequestContext {
        &*self.context
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        &mut *self.context
    }

    pub fn response(&self) -> Option<&ResponseEnvelope> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut ResponseEnvelope> {
        self.response.as_mut()
    }

    /// Sets the in-flight response. Before execution this short-circuits the
    /// function call.
    pub fn set_response(&mut self, response: ResponseEnvelope) {
        *self.response = Some(response);
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtensionEvent, LifecycleEvent, RequestContext};
    use crate::protocol::{ExtensionInvocation, RequestEnvelope};
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Slot(u32);

    #[test]
    fn context_slots_are_typed() {
        let mut context = RequestContext::new();
        assert_eq!(context.insert(Slot(1)), None);
        assert_eq!(context.insert(Slot(2)), Some(Slot(1)));
        assert_eq!(context.get::<Slot>(), Some(&Slot(2)));
        assert!(context.get::<String>().is_none());
        assert_eq!(context.remove::<Slot>(), Some(Slot(2)));
        assert!(!context.contains::<Slot>());
    }

    #[test]
    fn outer_events_hide_invocation() {
        let invocation = ExtensionInvocation::new("urn:vend:ext:test", json!({}));
        let request = RequestEnvelope::new("req-1", "urn:acme:fn:a", json!({}));
        let mut context = RequestContext::new();
        let mut response = None;

        let event = ExtensionEvent::new(
            LifecycleEvent::RequestValidated,
            &request,
            Some(&invocation),
            &mut context,
            &mut response,
        );
        assert!(event.invocation().is_none());
    }
}
