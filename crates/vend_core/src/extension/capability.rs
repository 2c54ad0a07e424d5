//! Capability advertisements for discovery responses.

use crate::extension::event::LifecycleEvent;
use crate::extension::manifest::ExtensionManifest;
use serde::{Deserialize, Serialize};

/// What one registered extension advertises to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub urn: String,
    pub version: String,
    pub events: Vec<LifecycleEvent>,
    pub is_global: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl CapabilityDescriptor {
    /// Minimal descriptor derived from the manifest alone.
    pub fn from_manifest(manifest: &ExtensionManifest) -> Self {
        let mut events = manifest.events().collect::<Vec<_>>();
        events.sort();
        Self {
            urn: manifest.urn.clone(),
            version: manifest.version.clone(),
            events,
            is_global: manifest.is_global,
            summary: manifest.summary.clone(),
        }
    }
}
