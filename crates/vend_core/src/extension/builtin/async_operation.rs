//! Async operation extension: answers with an operation handle instead of
//! running the function inline.

use super::{parse_options, to_extension_error};
use crate::extension::event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation};
use crate::extension::kernel::Extension;
use crate::extension::manifest::ExtensionManifest;
use crate::extension::output::{operation_output, to_extension_output};
use crate::protocol::ResponseEnvelope;
use crate::service::operation_service::OperationService;
use crate::store::KeyedStore;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub const ASYNC_URN: &str = "urn:vend:ext:async";

const DEFAULT_OWNER: &str = "anonymous";

#[derive(Debug, Deserialize)]
struct AsyncOptions {
    #[serde(default)]
    owner: Option<String>,
}

pub struct AsyncOperationExtension<S: KeyedStore + Clone> {
    operations: Arc<OperationService<S>>,
}

impl<S: KeyedStore + Clone> AsyncOperationExtension<S> {
    pub fn new(operations: Arc<OperationService<S>>) -> Self {
        Self { operations }
    }
}

impl<S: KeyedStore + Clone + 'static> Extension for AsyncOperationExtension<S> {
    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest::new(ASYNC_URN, "0.1.0")
            .subscribe(LifecycleEvent::ExecutingFunction, 200)
            .with_summary("Tracks the call as an operation with optimistic versioning")
    }

    fn handles(&self, event: LifecycleEvent) -> bool {
        event == LifecycleEvent::ExecutingFunction
    }

    fn handle(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
        let options: AsyncOptions = parse_options(ASYNC_URN, event.invocation())?;
        let owner = options
            .owner
            .filter(|owner| !owner.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OWNER.to_string());

        let operation = self
            .operations
            .create(&owner, event.request().function())
            .map_err(|err| to_extension_error(ASYNC_URN, err.to_error_object()))?;

        let mut response = ResponseEnvelope::success(
            event.request().id.clone(),
            json!({
                "operation_id": operation.id,
                "status": operation.status,
            }),
        );
        response.push_extension(to_extension_output(ASYNC_URN, &operation_output(&operation)));
        event.set_response(response);
        Ok(Propagation::Stop)
    }
}
