//! Replay extension.
//!
//! `queue` stores a queued replay and answers with its id; `immediate` lets the
//! function run and records a terminal `processed` replay afterwards.

use super::{parse_options, to_extension_error};
use crate::extension::event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation};
use crate::extension::kernel::Extension;
use crate::extension::manifest::ExtensionManifest;
use crate::extension::output::{build_processed_response, build_queued_response, to_extension_output};
use crate::model::ttl::Ttl;
use crate::protocol::ResponseEnvelope;
use crate::service::replay_service::ReplayService;
use crate::store::KeyedStore;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const REPLAY_URN: &str = "urn:vend:ext:replay";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplayMode {
    Queue,
    #[default]
    Immediate,
}

#[derive(Debug, Deserialize)]
struct ReplayOptions {
    #[serde(default)]
    mode: ReplayMode,
    #[serde(default)]
    ttl: Option<Ttl>,
}

/// Marks a request whose result is recorded after execution.
struct ImmediateReplay;

pub struct ReplayExtension<S: KeyedStore> {
    replays: Arc<ReplayService<S>>,
}

impl<S: KeyedStore> ReplayExtension<S> {
    pub fn new(replays: Arc<ReplayService<S>>) -> Self {
        Self { replays }
    }

    fn before(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        let options: ReplayOptions = parse_options(REPLAY_URN, event.invocation())?;
        if options.mode == ReplayMode::Immediate {
            event.context_mut().insert(ImmediateReplay);
            return Ok(Propagation::Continue);
        }

        let record = self
            .replays
            .enqueue(event.request().function(), options.ttl)
            .map_err(|err| to_extension_error(REPLAY_URN, err.to_error_object()))?;
        let mut response = ResponseEnvelope::success(
            event.request().id.clone(),
            json!({ "replay_id": record.id, "status": record.status }),
        );
        response.push_extension(to_extension_output(REPLAY_URN, &build_queued_response(&record)));
        event.set_response(response);
        Ok(Propagation::Stop)
    }

    fn after(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        if event.context_mut().remove::<ImmediateReplay>().is_none() {
            return Ok(Propagation::Continue);
        }
        let Some(result) = event.response().and_then(|response| response.result()).cloned() else {
            return Ok(Propagation::Continue);
        };

        let record = self
            .replays
            .record_processed(event.request().function(), Some(result))
            .map_err(|err| to_extension_error(REPLAY_URN, err.to_error_object()))?;
        if let Some(response) = event.response_mut() {
            response.push_extension(to_extension_output(
                REPLAY_URN,
                &build_processed_response(&record),
            ));
        }
        Ok(Propagation::Continue)
    }
}

impl<S: KeyedStore + 'static> Extension for ReplayExtension<S> {
    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(REPLAY_URN, "0.1.0")
            .subscribe(LifecycleEvent::ExecutingFunction, 150)
            .subscribe(LifecycleEvent::FunctionExecuted, 0)
            .with_summary("Queued or recorded replays with TTL expiry")
    }

    fn handles(&self, event: LifecycleEvent) -> bool {
        matches!(
            event,
            LifecycleEvent::ExecutingFunction | LifecycleEvent::FunctionExecuted
        )
    }

    fn handle(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        match event.kind() {
            LifecycleEvent::ExecutingFunction => self.before(event),
            LifecycleEvent::FunctionExecuted => self.after(event),
            LifecycleEvent::RequestValidated | LifecycleEvent::SendingResponse => {
                Ok(Propagation::Continue)
            }
        }
    }
}
