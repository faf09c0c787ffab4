//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hotbridge_plugin::prelude::*;` to import all essential types.

// Errors
pub use crate::{ManifestError, ManifestResult, SandboxError, SandboxResult, ValidationErrors};

// Manifests
pub use crate::{
    HookKind, HookSet, Permissions, PluginId, PluginManifest, ValidatedManifest, load_manifest,
    validate_manifest,
};

// Sandboxing
pub use crate::{
    CapabilityGate, DeviceFilter, HostContext, PluginHooks, QueueHub, RuntimeFactory,
    SandboxConfig, SandboxHandle, StandardRuntimes,
};
