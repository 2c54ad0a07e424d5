//! Core of the vend RPC extension pipeline.
//! This crate is the single source of truth for lock, cancellation and
//! lifecycle invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod extension;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod repo;
pub mod runtime;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use extension::builtin::BuiltinServices;
pub use extension::{
    Extension, ExtensionError, ExtensionEvent, ExtensionManifest, ExtensionPipeline,
    ExtensionRegistry, FunctionExecutor, LifecycleEvent, Propagation,
};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use protocol::{
    ErrorCode, ErrorObject, ExtensionInvocation, ExtensionOutput, RequestEnvelope,
    ResponseEnvelope,
};
pub use runtime::{CoreRuntime, CoreRuntimeBuilder, RuntimeError, SharedStore};
pub use store::{InMemoryKeyedStore, KeyedStore, SqliteKeyedStore, StoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
