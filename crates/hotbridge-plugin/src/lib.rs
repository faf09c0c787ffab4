//! Hotbridge Plugin - manifests, permissions and sandboxed execution.
//!
//! This crate provides:
//! - The plugin manifest model and its validator ([`validate_manifest`])
//! - Manifest discovery on disk (`plugin.json` / `Plugin.toml`)
//! - [`DeviceFilter`], the compiled form of a plugin's USB permission
//! - [`CapabilityGate`], which checks every host call against declared
//!   filesystem and queue permissions
//! - The sandbox manager ([`SandboxHandle`]) with in-process and Extism
//!   WASM runtimes

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod capability;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod manifest;
pub mod queue;
pub mod sandbox;
pub mod validate;

pub use capability::CapabilityGate;
pub use discovery::{
    JSON_MANIFEST, LoadedManifest, MAX_MANIFEST_BYTES, TOML_MANIFEST, discover_manifests,
    load_manifest, resolve_manifest_path,
};
pub use error::{
    ManifestError, ManifestResult, SandboxError, SandboxResult, ValidationErrors, ValidationIssue,
};
pub use filter::DeviceFilter;
pub use manifest::{
    FsGrant, FsMode, HookKind, HookSet, Permissions, PluginId, PluginManifest, UsbPermission,
};
pub use queue::{QueueHub, QueueMessage};
pub use sandbox::{
    BUILTIN_PREFIX, HookPayload, HookResult, HostContext, InProcessRuntime, InterruptHandle,
    Invocation, PluginHooks, PluginRuntime, RuntimeContext, RuntimeFactory, SandboxConfig,
    SandboxHandle, SandboxStats, StandardRuntimes, Termination, WasmRuntime,
};
pub use validate::{ValidatedManifest, validate_manifest, validate_manifest_str};
