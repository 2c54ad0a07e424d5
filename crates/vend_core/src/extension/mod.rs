//! Extension kernel.
//!
//! Manifests, the URN-keyed registry, lifecycle dispatch and the first-party
//! extensions. Handlers are typed trait objects resolved at registration.

pub mod builtin;
pub mod capability;
pub mod event;
pub mod kernel;
pub mod manifest;
pub mod output;
pub mod pipeline;

pub use capability::CapabilityDescriptor;
pub use event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation, RequestContext};
pub use kernel::{Extension, ExtensionRegistry, RegisteredExtension, RegistrationError};
pub use manifest::{ExtensionManifest, ManifestValidationError, Subscription};
pub use pipeline::{ExtensionPipeline, FunctionExecutor};
