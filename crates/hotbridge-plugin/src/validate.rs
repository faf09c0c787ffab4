//! Manifest validation.
//!
//! Validation walks the whole document and collects every violation with
//! its field path instead of stopping at the first one. On success the
//! document is converted into a [`PluginManifest`] and its `usb` permission
//! is compiled into a [`DeviceFilter`].

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::sync::LazyLock;

use hotbridge_core::{DeviceClass, ProductId, VendorId};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ValidationErrors;
use crate::filter::DeviceFilter;
use crate::manifest::{
    FsGrant, FsMode, HookKind, HookSet, Permissions, PluginId, PluginManifest, UsbPermission,
};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("invalid regex"));

static QUEUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("invalid regex"));

/// Permission categories this host enforces.
const KNOWN_PERMISSIONS: [&str; 3] = ["usb", "filesystem", "queue"];

/// A manifest that passed validation, with its compiled filter.
#[derive(Debug, Clone)]
pub struct ValidatedManifest {
    manifest: PluginManifest,
    filter: DeviceFilter,
}

impl ValidatedManifest {
    /// The typed manifest.
    #[must_use]
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    /// The compiled device filter.
    #[must_use]
    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    /// Plugin id.
    #[must_use]
    pub fn id(&self) -> &PluginId {
        &self.manifest.name
    }

    /// Split into parts.
    #[must_use]
    pub fn into_parts(self) -> (PluginManifest, DeviceFilter) {
        (self.manifest, self.filter)
    }
}

/// Validate a manifest document.
///
/// # Errors
///
/// Returns every schema violation, in document order.
pub fn validate_manifest(doc: &Value) -> Result<ValidatedManifest, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let Some(root) = doc.as_object() else {
        errors.push("$", "manifest must be an object");
        return Err(errors);
    };

    let name = validate_name(root, &mut errors);
    let version = validate_version(root, &mut errors);
    let entry = validate_entry(root, &mut errors);
    let permissions = validate_permissions(root, &mut errors);
    let hooks = validate_hooks(root, &mut errors);

    match (name, version, entry, permissions, hooks) {
        (Some(name), Some(version), Some(entry), Some(permissions), Some(hooks))
            if errors.is_empty() =>
        {
            let filter = DeviceFilter::compile(permissions.usb.as_ref());
            Ok(ValidatedManifest {
                manifest: PluginManifest {
                    name,
                    version,
                    entry,
                    permissions,
                    hooks,
                },
                filter,
            })
        },
        _ => Err(errors),
    }
}

/// Parse and validate a JSON manifest.
///
/// # Errors
///
/// Malformed JSON is reported as a single issue at `$`.
pub fn validate_manifest_str(json: &str) -> Result<ValidatedManifest, ValidationErrors> {
    let doc: Value = serde_json::from_str(json).map_err(|e| {
        let mut errors = ValidationErrors::default();
        errors.push("$", format!("invalid JSON: {e}"));
        errors
    })?;
    validate_manifest(&doc)
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut ValidationErrors,
) -> Option<&'a Value> {
    let value = obj.get(key);
    if value.is_none() {
        errors.push(path, "is required");
    }
    value
}

fn required_string<'a>(
    root: &'a Map<String, Value>,
    key: &str,
    errors: &mut ValidationErrors,
) -> Option<&'a str> {
    let value = required(root, key, key, errors)?;
    let s = value.as_str();
    if s.is_none() {
        errors.push(key, "must be a string");
    }
    s
}

fn validate_name(root: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<PluginId> {
    let name = required_string(root, "name", errors)?;
    if NAME_RE.is_match(name) {
        Some(PluginId::new_unchecked(name))
    } else {
        errors.push("name", format!("'{name}' must match ^[a-z0-9-]+$"));
        None
    }
}

fn validate_version(
    root: &Map<String, Value>,
    errors: &mut ValidationErrors,
) -> Option<semver::Version> {
    let raw = required_string(root, "version", errors)?;
    match semver::Version::parse(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push("version", format!("'{raw}' is not a semantic version: {e}"));
            None
        },
    }
}

fn validate_entry(root: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<String> {
    let entry = required_string(root, "entry", errors)?;
    if entry.trim().is_empty() {
        errors.push("entry", "must not be empty");
        return None;
    }
    Some(entry.to_string())
}

fn validate_permissions(
    root: &Map<String, Value>,
    errors: &mut ValidationErrors,
) -> Option<Permissions> {
    let value = required(root, "permissions", "permissions", errors)?;
    let Some(obj) = value.as_object() else {
        errors.push("permissions", "must be an object");
        return None;
    };

    let mut permissions = Permissions::default();

    if let Some(usb) = obj.get("usb") {
        permissions.usb = validate_usb(usb, errors);
    }
    if let Some(fs) = obj.get("filesystem") {
        permissions.filesystem = validate_filesystem(fs, errors);
    }
    if let Some(queue) = obj.get("queue") {
        permissions.queue = validate_queues(queue, errors);
    }

    let extra: BTreeMap<String, Value> = obj
        .iter()
        .filter(|(k, _)| !KNOWN_PERMISSIONS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for key in extra.keys() {
        warn!(category = %key, "unknown permission category accepted without effect");
    }
    permissions.extra = extra;

    Some(permissions)
}

fn validate_usb(value: &Value, errors: &mut ValidationErrors) -> Option<UsbPermission> {
    let Some(obj) = value.as_object() else {
        errors.push("permissions.usb", "must be an object");
        return None;
    };
    let before = errors.len();

    let vendor_ids = hex_list(obj, "vendor_ids", errors, VendorId::parse_hex);
    let product_ids = hex_list(obj, "product_ids", errors, ProductId::parse_hex);
    let device_classes = class_list(obj, errors);
    let exclusive = flag(obj, "exclusive", errors);
    let detach_kernel_driver = flag(obj, "detach_kernel_driver", errors);

    (errors.len() == before).then_some(UsbPermission {
        vendor_ids,
        product_ids,
        device_classes,
        exclusive,
        detach_kernel_driver,
    })
}

fn array_field<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    errors: &mut ValidationErrors,
) -> &'a [Value] {
    match obj.get(key) {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push(path, "must be an array");
            &[]
        },
    }
}

fn hex_list<T, E>(
    obj: &Map<String, Value>,
    key: &str,
    errors: &mut ValidationErrors,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Vec<T> {
    let path = format!("permissions.usb.{key}");
    let items = array_field(obj, key, &path, errors);
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let parsed = item.as_str().map(&parse);
        match parsed {
            Some(Ok(id)) => out.push(id),
            _ => errors.push(
                format!("{path}[{i}]"),
                format!("{item} is not a hexadecimal id such as \"0x04A9\""),
            ),
        }
    }
    out
}

fn class_list(obj: &Map<String, Value>, errors: &mut ValidationErrors) -> Vec<DeviceClass> {
    let path = "permissions.usb.device_classes";
    let items = array_field(obj, "device_classes", path, errors);
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item.as_u64().and_then(|n| u8::try_from(n).ok()) {
            Some(class) => out.push(DeviceClass(class)),
            None => errors.push(
                format!("{path}[{i}]"),
                format!("{item} is not an integer device class between 0 and 255"),
            ),
        }
    }
    out
}

fn flag(obj: &Map<String, Value>, key: &str, errors: &mut ValidationErrors) -> bool {
    match obj.get(key) {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            errors.push(format!("permissions.usb.{key}"), "must be a boolean");
            false
        },
    }
}

fn validate_filesystem(value: &Value, errors: &mut ValidationErrors) -> Vec<FsGrant> {
    let Some(items) = value.as_array() else {
        errors.push("permissions.filesystem", "must be an array");
        return Vec::new();
    };
    let mut grants = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let base = format!("permissions.filesystem[{i}]");
        let Some(obj) = item.as_object() else {
            errors.push(base, "must be an object with path and mode");
            continue;
        };

        let path = match obj.get("path").and_then(Value::as_str) {
            Some(p) if is_clean_absolute(Path::new(p)) => Some(p),
            Some(_) => {
                errors.push(
                    format!("{base}.path"),
                    "must be an absolute path without '..' components",
                );
                None
            },
            None => {
                errors.push(format!("{base}.path"), "is required and must be a string");
                None
            },
        };
        let mode = match obj.get("mode").and_then(Value::as_str) {
            Some(raw) => {
                let mode = FsMode::parse(raw);
                if mode.is_none() {
                    errors.push(
                        format!("{base}.mode"),
                        format!("'{raw}' must be one of r, w, rw"),
                    );
                }
                mode
            },
            None => {
                errors.push(format!("{base}.mode"), "is required and must be a string");
                None
            },
        };

        if let (Some(path), Some(mode)) = (path, mode) {
            grants.push(FsGrant::new(path, mode));
        }
    }
    grants
}

fn is_clean_absolute(path: &Path) -> bool {
    path.is_absolute() && !path.components().any(|c| matches!(c, Component::ParentDir))
}

fn validate_queues(value: &Value, errors: &mut ValidationErrors) -> Vec<String> {
    let Some(items) = value.as_array() else {
        errors.push("permissions.queue", "must be an array of queue names");
        return Vec::new();
    };
    let mut names = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match item.as_str() {
            Some(name) if QUEUE_RE.is_match(name) => names.push(name.to_string()),
            _ => errors.push(
                format!("permissions.queue[{i}]"),
                format!("{item} is not a valid queue name"),
            ),
        }
    }
    names
}

fn validate_hooks(root: &Map<String, Value>, errors: &mut ValidationErrors) -> Option<HookSet> {
    let value = required(root, "hooks", "hooks", errors)?;
    let Some(obj) = value.as_object() else {
        errors.push("hooks", "must be an object");
        return None;
    };

    let before = errors.len();
    let mut hooks = HookSet::new();
    for (key, value) in obj {
        let path = format!("hooks.{key}");
        let Some(hook) = HookKind::from_manifest_key(key) else {
            errors.push(
                path,
                "unknown hook; expected onLoad, onUnload, onUSBAttach or onUSBDetach",
            );
            continue;
        };
        match value {
            Value::Bool(true) => hooks.set(hook, hook.default_export()),
            Value::Bool(false) | Value::Null => {},
            Value::String(export) if !export.trim().is_empty() => hooks.set(hook, export.as_str()),
            _ => errors.push(path, "must be true or a non-empty export name"),
        }
    }
    (errors.len() == before).then_some(hooks)
}
