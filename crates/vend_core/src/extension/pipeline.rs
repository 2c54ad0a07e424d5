//! Request lifecycle dispatch.
//!
//! # Responsibility
//! - Thread one request through `RequestValidated -> ExecutingFunction ->
//!   FunctionExecuted -> SendingResponse`, calling subscribed handlers in
//!   ascending priority.
//! - Apply the short-circuit and fatal/non-fatal error policy.
//!
//! # Invariants
//! - Handlers with equal priority run in registration order.
//! - A response present after a pre-execution handler ends that event, skips
//!   the function and `FunctionExecuted`; `SendingResponse` still runs.
//! - A fatal handler error becomes a one-error failure response and halts
//!   every remaining event.
//! - Processing never panics and always yields a response.

use crate::extension::event::{
    ExtensionError, ExtensionEvent, LifecycleEvent, Propagation, RequestContext,
};
use crate::extension::kernel::{ExtensionRegistry, RegisteredExtension};
use crate::logging::log_field;
use crate::protocol::{ErrorObject, ExtensionInvocation, RequestEnvelope, ResponseEnvelope};
use log::{debug, error, warn};

/// Out-of-scope function resolver and runner.
pub trait FunctionExecutor {
    fn execute(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, ErrorObject>;
}

impl<F> FunctionExecutor for F
where
    F: Fn(&RequestEnvelope) -> Result<ResponseEnvelope, ErrorObject>,
{
    fn execute(&self, request: &RequestEnvelope) -> Result<ResponseEnvelope, ErrorObject> {
        self(request)
    }
}

/// One extension taking part in one request.
struct Participant<'r> {
    entry: &'r RegisteredExtension,
    invocation: Option<&'r ExtensionInvocation>,
}

pub struct ExtensionPipeline {
    registry: ExtensionRegistry,
}

impl ExtensionPipeline {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Runs `request` through every lifecycle event and `executor`.
    pub fn process(
        &self,
        request: &RequestEnvelope,
        executor: &dyn FunctionExecutor,
    ) -> ResponseEnvelope {
        let participants = self.participants(request);
        let mut context = RequestContext::new();
        let mut response: Option<ResponseEnvelope> = None;

        let mut short_circuited = false;
        for kind in [LifecycleEvent::RequestValidated, LifecycleEvent::ExecutingFunction] {
            if let Err(err) = self.dispatch(kind, request, &participants, &mut context, &mut response)
            {
                return fatal_response(request, err);
            }
            if response.is_some() {
                short_circuited = true;
                debug!(
                    "event=pipeline_short_circuit module=pipeline status=ok request_id={} at={}",
                    log_field(&request.id),
                    kind
                );
                break;
            }
        }

        if !short_circuited {
            let executed = match executor.execute(request) {
                Ok(executed) => executed,
                Err(err) => ResponseEnvelope::from_error(request.id.clone(), err),
            };
            response = Some(executed);
            if let Err(err) = self.dispatch(
                LifecycleEvent::FunctionExecuted,
                request,
                &participants,
                &mut context,
                &mut response,
            ) {
                return fatal_response(request, err);
            }
        }

        if let Err(err) = self.dispatch(
            LifecycleEvent::SendingResponse,
            request,
            &participants,
            &mut context,
            &mut response,
        ) {
            return fatal_response(request, err);
        }

        response.unwrap_or_else(|| {
            error!(
                "event=pipeline_process module=pipeline status=error reason=no_response request_id={}",
                log_field(&request.id)
            );
            ResponseEnvelope::from_error(
                request.id.clone(),
                ErrorObject::new("INTERNAL_ERROR", "pipeline produced no response"),
            )
        })
    }

    /// Registered extensions named by the request, plus every global one,
    /// in registration order.
    fn participants<'r>(&'r self, request: &'r RequestEnvelope) -> Vec<Participant<'r>> {
        for invocation in &request.extensions {
            if !self.registry.contains(&invocation.urn) {
                debug!(
                    "event=pipeline_invocation module=pipeline status=ignored reason=unknown_urn urn={}",
                    log_field(&invocation.urn)
                );
            }
        }

        self.registry
            .iter()
            .filter_map(|entry| {
                let invocation = request.extension(&entry.manifest.urn);
                (invocation.is_some() || entry.manifest.is_global).then_some(Participant {
                    entry,
                    invocation,
                })
            })
            .collect()
    }

    fn dispatch(
        &self,
        kind: LifecycleEvent,
        request: &RequestEnvelope,
        participants: &[Participant<'_>],
        context: &mut RequestContext,
        response: &mut Option<ResponseEnvelope>,
    ) -> Result<(), ExtensionError> {
        let mut handlers = participants
            .iter()
            .filter_map(|participant| {
                participant
                    .entry
                    .manifest
                    .priority_for(kind)
                    .map(|priority| (priority, participant))
            })
            .collect::<Vec<_>>();
        // Stable sort keeps registration order for equal priorities.
        handlers.sort_by_key(|(priority, _)| *priority);

        for (_, participant) in handlers {
            let manifest = &participant.entry.manifest;
            let mut event =
                ExtensionEvent::new(kind, request, participant.invocation, context, response);
            match participant.entry.extension.handle(&mut event) {
                Ok(Propagation::Continue) => {}
                Ok(Propagation::Stop) => break,
                Err(err) if manifest.is_error_fatal => {
                    error!(
                        "event=extension_handle module=pipeline status=fatal urn={} at={} code={}",
                        manifest.urn,
                        kind,
                        log_field(&err.error.code)
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "event=extension_handle module=pipeline status=ignored urn={} at={} code={}",
                        manifest.urn,
                        kind,
                        log_field(&err.error.code)
                    );
                }
            }
            if kind.precedes_execution() && response.is_some() {
                break;
            }
        }
        Ok(())
    }
}

fn fatal_response(request: &RequestEnvelope, err: ExtensionError) -> ResponseEnvelope {
    ResponseEnvelope::from_error(request.id.clone(), err.error)
}
