//! Process wiring from configuration.
//!
//! # Responsibility
//! - Open the configured keyed store, build the built-in services and the
//!   extension pipeline once at startup.
//!
//! # Invariants
//! - Every service and the store share one clock.
//! - The registry is frozen once the runtime is built.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, CoreConfig, StoreConfig};
use crate::extension::builtin::BuiltinServices;
use crate::extension::{
    CapabilityDescriptor, Extension, ExtensionPipeline, ExtensionRegistry, FunctionExecutor,
    RegistrationError,
};
use crate::logging::{init_logging_from, LoggingError};
use crate::protocol::{RequestEnvelope, ResponseEnvelope};
use crate::store::{InMemoryKeyedStore, KeyedStore, SqliteKeyedStore, StoreError};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Store handle shared by every service of one runtime.
pub type SharedStore = Arc<dyn KeyedStore>;

#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
    Logging(LoggingError),
    Store(StoreError),
    Registration(RegistrationError),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Registration(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Registration(err) => Some(err),
        }
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<LoggingError> for RuntimeError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<StoreError> for RuntimeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RegistrationError> for RuntimeError {
    fn from(value: RegistrationError) -> Self {
        Self::Registration(value)
    }
}

/// Fully wired core: store, built-in services and pipeline.
pub struct CoreRuntime {
    services: BuiltinServices<SharedStore>,
    pipeline: ExtensionPipeline,
}

impl CoreRuntime {
    /// Builds a runtime on the system clock with the built-ins registered.
    pub fn from_config(config: &CoreConfig) -> Result<Self, RuntimeError> {
        Self::builder(config, Arc::new(SystemClock))?.build()
    }

    /// Starts a builder so callers can add their own extensions before the
    /// registry is frozen.
    pub fn builder(
        config: &CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<CoreRuntimeBuilder, RuntimeError> {
        config.validate()?;
        init_logging_from(&config.logging)?;

        let store = open_store(&config.store, clock.clone())?;
        let services = BuiltinServices::new(store, clock, config);
        let mut registry = ExtensionRegistry::new();
        services.register_all(&mut registry)?;
        Ok(CoreRuntimeBuilder { services, registry })
    }

    pub fn services(&self) -> &BuiltinServices<SharedStore> {
        &self.services
    }

    pub fn pipeline(&self) -> &ExtensionPipeline {
        &self.pipeline
    }

    pub fn process(
        &self,
        request: &RequestEnvelope,
        executor: &dyn FunctionExecutor,
    ) -> ResponseEnvelope {
        self.pipeline.process(request, executor)
    }

    pub fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.pipeline.registry().capabilities()
    }
}

pub struct CoreRuntimeBuilder {
    services: BuiltinServices<SharedStore>,
    registry: ExtensionRegistry,
}

impl CoreRuntimeBuilder {
    pub fn register(mut self, extension: Arc<dyn Extension>) -> Result<Self, RuntimeError> {
        self.registry.register(extension)?;
        Ok(self)
    }

    pub fn build(self) -> Result<CoreRuntime, RuntimeError> {
        info!(
            "event=runtime_build module=core status=ok extensions={}",
            self.registry.len()
        );
        Ok(CoreRuntime {
            services: self.services,
            pipeline: ExtensionPipeline::new(self.registry),
        })
    }
}

fn open_store(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<SharedStore, RuntimeError> {
    let store: SharedStore = match config {
        StoreConfig::Memory => Arc::new(InMemoryKeyedStore::new(clock)),
        StoreConfig::Sqlite { path } => Arc::new(SqliteKeyedStore::open(path, clock)?),
    };
    Ok(store)
}
