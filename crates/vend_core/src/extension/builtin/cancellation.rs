//! Cancellation extension.
//!
//! Registers the request token on `RequestValidated` and checks it once on
//! `ExecutingFunction`. Nothing preempts a function that already started.

use super::{parse_options, to_extension_error};
use crate::extension::event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation};
use crate::extension::kernel::Extension;
use crate::extension::manifest::ExtensionManifest;
use crate::protocol::{mask_secret, ResponseEnvelope};
use crate::service::cancellation_service::{CancellationError, CancellationService};
use crate::store::KeyedStore;
use log::info;
use serde::Deserialize;
use std::sync::Arc;

pub const CANCELLATION_URN: &str = "urn:vend:ext:cancellation";

#[derive(Debug, Deserialize)]
struct CancellationOptions {
    #[serde(default)]
    token: Option<String>,
}

/// Token registered for the current request.
struct RegisteredToken(String);

pub struct CancellationExtension<S: KeyedStore> {
    tokens: Arc<CancellationService<S>>,
}

impl<S: KeyedStore> CancellationExtension<S> {
    pub fn new(tokens: Arc<CancellationService<S>>) -> Self {
        Self { tokens }
    }

    fn register(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        let options: CancellationOptions =
            parse_options(CANCELLATION_URN, event.request().extension(CANCELLATION_URN))?;
        let token = options.token.unwrap_or_default();
        let tracked = self
            .tokens
            .register(&token)
            .map_err(|err| to_extension_error(CANCELLATION_URN, err.to_error_object()))?;
        if tracked {
            event.context_mut().insert(RegisteredToken(token));
        }
        Ok(Propagation::Continue)
    }

    fn check(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        let Some(RegisteredToken(token)) = event.context().get::<RegisteredToken>() else {
            return Ok(Propagation::Continue);
        };
        let token = token.clone();
        let cancelled = self
            .tokens
            .is_cancelled(&token)
            .map_err(|err| to_extension_error(CANCELLATION_URN, err.to_error_object()))?;
        if !cancelled {
            return Ok(Propagation::Continue);
        }

        self.cleanup(event)?;
        info!(
            "event=cancellation_observed module=cancellation status=ok token={}",
            mask_secret(&token)
        );
        let error = CancellationError::Cancelled { token }.to_error_object();
        let request_id = event.request().id.clone();
        event.set_response(ResponseEnvelope::from_error(request_id, error));
        Ok(Propagation::Stop)
    }

    fn cleanup(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        if let Some(RegisteredToken(token)) = event.context_mut().remove::<RegisteredToken>() {
            self.tokens
                .cleanup(&token)
                .map_err(|err| to_extension_error(CANCELLATION_URN, err.to_error_object()))?;
        }
        Ok(Propagation::Continue)
    }
}

impl<S: KeyedStore + 'static> Extension for CancellationExtension<S> {
    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(CANCELLATION_URN, "0.1.0")
            .subscribe(LifecycleEvent::RequestValidated, -100)
            .subscribe(LifecycleEvent::ExecutingFunction, -100)
            .subscribe(LifecycleEvent::FunctionExecuted, 100)
            .subscribe(LifecycleEvent::SendingResponse, 100)
            .with_summary("Cooperative cancellation checked before the function runs")
    }

    fn handles(&self, _event: LifecycleEvent) -> bool {
        true
    }

    fn handle(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        match event.kind() {
            LifecycleEvent::RequestValidated => self.register(event),
            LifecycleEvent::ExecutingFunction => self.check(event),
            LifecycleEvent::FunctionExecuted | LifecycleEvent::SendingResponse => {
                self.cleanup(event)
            }
        }
    }
}
