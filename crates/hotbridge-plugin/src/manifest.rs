//! Strongly typed plugin manifest.
//!
//! These types are only ever produced by the validator; the raw manifest
//! document is never consulted again after validation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use hotbridge_core::{DeviceAction, DeviceClass, ProductId, VendorId};
use serde::{Deserialize, Serialize};

/// Unique, kebab-case plugin identifier taken from the manifest `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    /// Wrap a name that already passed validation.
    pub(crate) fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Create an id for tests and built-in plugins.
    #[must_use]
    pub fn from_static(name: &str) -> Self {
        Self(name.to_string())
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumer name used for this plugin's event log cursor.
    #[must_use]
    pub fn consumer_name(&self) -> String {
        format!("plugin:{}", self.0)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The four hook slots a plugin may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    /// Called once when the plugin starts.
    #[serde(rename = "onLoad")]
    OnLoad,
    /// Called once when the plugin stops.
    #[serde(rename = "onUnload")]
    OnUnload,
    /// Called for each matching attach event.
    #[serde(rename = "onUSBAttach")]
    OnUsbAttach,
    /// Called for each matching detach event.
    #[serde(rename = "onUSBDetach")]
    OnUsbDetach,
}

impl HookKind {
    /// Every hook slot.
    pub const ALL: [Self; 4] = [
        Self::OnLoad,
        Self::OnUnload,
        Self::OnUsbAttach,
        Self::OnUsbDetach,
    ];

    /// Key used in the manifest `hooks` table and in payloads.
    #[must_use]
    pub fn manifest_key(self) -> &'static str {
        match self {
            Self::OnLoad => "onLoad",
            Self::OnUnload => "onUnload",
            Self::OnUsbAttach => "onUSBAttach",
            Self::OnUsbDetach => "onUSBDetach",
        }
    }

    /// Export called when the manifest declares the hook as `true`.
    #[must_use]
    pub fn default_export(self) -> &'static str {
        match self {
            Self::OnLoad => "on_load",
            Self::OnUnload => "on_unload",
            Self::OnUsbAttach => "on_usb_attach",
            Self::OnUsbDetach => "on_usb_detach",
        }
    }

    /// Look up a hook by its manifest key.
    #[must_use]
    pub fn from_manifest_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.manifest_key() == key)
    }

    /// The hook that handles a device action.
    #[must_use]
    pub fn for_action(action: DeviceAction) -> Self {
        match action {
            DeviceAction::Attach => Self::OnUsbAttach,
            DeviceAction::Detach => Self::OnUsbDetach,
        }
    }

    /// Whether this hook carries a device event.
    #[must_use]
    pub fn is_device_hook(self) -> bool {
        matches!(self, Self::OnUsbAttach | Self::OnUsbDetach)
    }

    fn slot(self) -> usize {
        match self {
            Self::OnLoad => 0,
            Self::OnUnload => 1,
            Self::OnUsbAttach => 2,
            Self::OnUsbDetach => 3,
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_key())
    }
}

/// Declared hooks, resolved to export names at validation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookSet {
    slots: [Option<String>; 4],
}

impl HookSet {
    /// An empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `hook`, implemented by the export `export`.
    #[must_use]
    pub fn with(mut self, hook: HookKind, export: impl Into<String>) -> Self {
        self.set(hook, export);
        self
    }

    /// Declare `hook` using its default export name.
    #[must_use]
    pub fn with_default(self, hook: HookKind) -> Self {
        self.with(hook, hook.default_export())
    }

    pub(crate) fn set(&mut self, hook: HookKind, export: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(hook.slot()) {
            *slot = Some(export.into());
        }
    }

    /// Export implementing `hook`, if declared.
    #[must_use]
    pub fn export(&self, hook: HookKind) -> Option<&str> {
        self.slots.get(hook.slot()).and_then(|s| s.as_deref())
    }

    /// Whether `hook` is declared.
    #[must_use]
    pub fn declares(&self, hook: HookKind) -> bool {
        self.export(hook).is_some()
    }

    /// Declared hooks.
    pub fn declared(&self) -> impl Iterator<Item = HookKind> + '_ {
        HookKind::ALL.into_iter().filter(|h| self.declares(*h))
    }
}

/// Access mode of a filesystem grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsMode {
    /// Read only.
    Read,
    /// Write only.
    Write,
    /// Read and write.
    ReadWrite,
}

impl FsMode {
    /// Parse `r`, `w`, `rw` or their long forms.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "r" | "read" | "ro" => Some(Self::Read),
            "w" | "write" | "wo" => Some(Self::Write),
            "rw" | "read-write" | "readwrite" => Some(Self::ReadWrite),
            _ => None,
        }
    }

    /// Whether reads are allowed.
    #[must_use]
    pub fn allows_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Whether writes are allowed.
    #[must_use]
    pub fn allows_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// A declared filesystem path and its mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsGrant {
    /// Absolute path; grants cover the path and everything below it.
    pub path: PathBuf,
    /// Allowed access.
    pub mode: FsMode,
}

impl FsGrant {
    /// Create a grant.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, mode: FsMode) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode,
        }
    }
}

/// Declared USB permission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbPermission {
    /// Allowed vendors; empty matches any.
    pub vendor_ids: Vec<VendorId>,
    /// Allowed products; empty matches any.
    pub product_ids: Vec<ProductId>,
    /// Allowed device classes; empty matches any.
    pub device_classes: Vec<DeviceClass>,
    /// Plugin wants exclusive access to matching devices.
    pub exclusive: bool,
    /// Plugin wants the kernel driver detached.
    pub detach_kernel_driver: bool,
}

/// Everything a plugin may touch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Permissions {
    /// USB device access. `None` means the plugin receives no device events.
    pub usb: Option<UsbPermission>,
    /// Filesystem grants.
    pub filesystem: Vec<FsGrant>,
    /// Named queues the plugin may push to.
    pub queue: Vec<String>,
    /// Categories this host does not know; kept but never enforced.
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A validated plugin manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginManifest {
    /// Plugin identity.
    pub name: PluginId,
    /// Plugin version.
    pub version: semver::Version,
    /// Entry point reference: a `.wasm` path relative to the plugin
    /// directory, or `builtin:<name>` for in-process plugins.
    pub entry: String,
    /// Declared permissions.
    pub permissions: Permissions,
    /// Declared hooks.
    pub hooks: HookSet,
}
