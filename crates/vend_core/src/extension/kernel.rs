//! Extension contract and URN-keyed registry.
//!
//! # Responsibility
//! - Define the typed handler interface every extension implements.
//! - Validate manifests at registration and keep registration order.
//!
//! # Invariants
//! - Every registered extension handles each event its manifest subscribes to.
//! - Replacing an URN keeps its original position.
//! - The registry is built once at startup and read-only afterwards.

use crate::extension::capability::CapabilityDescriptor;
use crate::extension::event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation};
use crate::extension::manifest::{ExtensionManifest, ManifestValidationError};
use log::info;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Typed lifecycle handler.
pub trait Extension: Send + Sync {
    fn manifest(&self) -> ExtensionManifest;

    /// Whether `handle` implements `event`. Checked against the manifest at
    /// registration time.
    fn handles(&self, event: LifecycleEvent) -> bool;

    fn handle(&self, event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError>;

    fn capability(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::from_manifest(&self.manifest())
    }
}

/// Registered extension with its validated manifest.
#[derive(Clone)]
pub struct RegisteredExtension {
    pub manifest: ExtensionManifest,
    pub extension: Arc<dyn Extension>,
}

/// In-process extension registry.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    entries: Vec<RegisteredExtension>,
    positions: HashMap<String, usize>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces one extension after manifest validation.
    ///
    /// Returns the extension previously registered under the same URN.
    pub fn register(
        &mut self,
        extension: Arc<dyn Extension>,
    ) -> Result<Option<Arc<dyn Extension>>, RegistrationError> {
        let manifest = extension.manifest();
        manifest.validate().map_err(RegistrationError::InvalidManifest)?;
        if let Some(event) = manifest.events().find(|event| !extension.handles(*event)) {
            return Err(RegistrationError::UnhandledEvent {
                urn: manifest.urn.clone(),
                event,
            });
        }

        info!(
            "event=extension_register module=extension status=ok urn={} version={} events={}",
            manifest.urn,
            manifest.version,
            manifest.subscriptions.len()
        );

        let entry = RegisteredExtension {
            manifest,
            extension,
        };
        match self.positions.get(&entry.manifest.urn) {
            Some(&position) => {
                let previous = std::mem::replace(&mut self.entries[position], entry);
                Ok(Some(previous.extension))
            }
            None => {
                self.positions
                    .insert(entry.manifest.urn.clone(), self.entries.len());
                self.entries.push(entry);
                Ok(None)
            }
        }
    }

    pub fn unregister(&mut self, urn: &str) -> Option<Arc<dyn Extension>> {
        let position = self.positions.remove(urn)?;
        let removed = self.entries.remove(position);
        for index in self.positions.values_mut() {
            if *index > position {
                *index -= 1;
            }
        }
        Some(removed.extension)
    }

    pub fn get(&self, urn: &str) -> Option<&RegisteredExtension> {
        self.positions
            .get(urn)
            .and_then(|position| self.entries.get(*position))
    }

    pub fn contains(&self, urn: &str) -> bool {
        self.positions.contains_key(urn)
    }

    /// Registered extensions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredExtension> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discovery advertisement, in registration order.
    pub fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.entries
            .iter()
            .map(|entry| entry.extension.capability())
            .collect()
    }
}

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidManifest(ManifestValidationError),
    UnhandledEvent { urn: String, event: LifecycleEvent },
}

impl Display for RegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid extension manifest: {err}"),
            Self::UnhandledEvent { urn, event } => {
                write!(f, "extension `{urn}` subscribes to {event} but does not handle it")
            }
        }
    }
}

impl Error for RegistrationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            Self::UnhandledEvent { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Extension, ExtensionRegistry, RegistrationError};
    use crate::extension::event::{ExtensionError, ExtensionEvent, LifecycleEvent, Propagation};
    use crate::extension::manifest::ExtensionManifest;
    use std::sync::Arc;

    struct Probe {
        urn: &'static str,
        version: &'static str,
        handled: &'static [LifecycleEvent],
    }

    impl Extension for Probe {
        fn manifest(&self) -> ExtensionManifest {
            ExtensionManifest::new(self.urn, self.version)
                .subscribe(LifecycleEvent::RequestValidated, 0)
        }

        fn handles(&self, event: LifecycleEvent) -> bool {
            self.handled.contains(&event)
        }

        fn handle(&self, _event: &mut ExtensionEvent<'_>) -> Result<Propagation, ExtensionError> {
            Ok(Propagation::Continue)
        }
    }

    fn probe(urn: &'static str, version: &'static str) -> Arc<Probe> {
        Arc::new(Probe {
            urn,
            version,
            handled: &[LifecycleEvent::RequestValidated],
        })
    }

    #[test]
    fn replace_keeps_first_position() {
        let mut registry = ExtensionRegistry::new();
        registry.register(probe("urn:vend:ext:a", "0.1.0")).expect("a");
        registry.register(probe("urn:vend:ext:b", "0.1.0")).expect("b");
        let previous = registry
            .register(probe("urn:vend:ext:a", "0.2.0"))
            .expect("replace a");
        assert!(previous.is_some());

        let urns = registry
            .iter()
            .map(|entry| entry.manifest.urn.as_str())
            .collect::<Vec<_>>();
        assert_eq!(urns, vec!["urn:vend:ext:a", "urn:vend:ext:b"]);
        assert_eq!(
            registry.get("urn:vend:ext:a").expect("a").manifest.version,
            "0.2.0"
        );
    }

    #[test]
    fn unregister_reindexes_later_entries() {
        let mut registry = ExtensionRegistry::new();
        registry.register(probe("urn:vend:ext:a", "0.1.0")).expect("a");
        registry.register(probe("urn:vend:ext:b", "0.1.0")).expect("b");
        assert!(registry.unregister("urn:vend:ext:a").is_some());
        assert!(registry.unregister("urn:vend:ext:a").is_none());
        assert_eq!(
            registry.get("urn:vend:ext:b").expect("b").manifest.urn,
            "urn:vend:ext:b"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_subscription_without_handler() {
        let mut registry = ExtensionRegistry::new();
        let err = registry
            .register(Arc::new(Probe {
                urn: "urn:vend:ext:a",
                version: "0.1.0",
                handled: &[],
            }))
            .err()
            .expect("unhandled event must fail");
        assert!(matches!(
            err,
            RegistrationError::UnhandledEvent {
                event: LifecycleEvent::RequestValidated,
                ..
            }
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn rejects_invalid_manifest() {
        let mut registry = ExtensionRegistry::new();
        let err = registry
            .register(probe("not-a-urn", "0.1.0"))
            .err()
            .expect("invalid urn must fail");
        assert!(matches!(err, RegistrationError::InvalidManifest(_)));
    }
}
