//! Test fixtures for devices, events and manifests.

use std::path::{Path, PathBuf};

use hotbridge_core::{
    BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, HotplugEvent, ProductId, VendorId,
};
use hotbridge_plugin::{JSON_MANIFEST, ValidatedManifest, validate_manifest};
use serde_json::{Value, json};

/// Vendor id of the scanner used throughout the tests (Canon).
pub const SCANNER_VENDOR: u16 = 0x04A9;

/// Product id of the scanner used throughout the tests.
pub const SCANNER_PRODUCT: u16 = 0x220E;

/// Create a descriptor on bus 1, port 1.
#[must_use]
pub fn device(action: DeviceAction, vendor: u16, product: u16) -> DeviceDescriptor {
    DeviceDescriptor::new(
        action,
        VendorId::new(vendor),
        ProductId::new(product),
        DeviceClass::IMAGE,
        BusLocation::new(1, "1").expect("valid bus location"),
    )
}

/// An attach descriptor.
#[must_use]
pub fn attach(vendor: u16, product: u16) -> DeviceDescriptor {
    device(DeviceAction::Attach, vendor, product)
}

/// A detach descriptor.
#[must_use]
pub fn detach(vendor: u16, product: u16) -> DeviceDescriptor {
    device(DeviceAction::Detach, vendor, product)
}

/// Wrap a descriptor in an event with the given sequence number.
#[must_use]
pub fn event(sequence: u64, descriptor: DeviceDescriptor) -> HotplugEvent {
    HotplugEvent::new(sequence, descriptor)
}

/// Manifest document for a built-in plugin named `name`, admitting the given
/// vendor and product ids, with all four hooks declared.
#[must_use]
pub fn manifest_json(name: &str, vendor_ids: &[&str], product_ids: &[&str]) -> Value {
    json!({
        "name": name,
        "version": "1.0.0",
        "entry": format!("builtin:{name}"),
        "permissions": {
            "usb": {
                "vendor_ids": vendor_ids,
                "product_ids": product_ids,
                "device_classes": [],
                "exclusive": false,
                "detach_kernel_driver": false
            },
            "filesystem": [],
            "queue": []
        },
        "hooks": {
            "onLoad": true,
            "onUnload": true,
            "onUSBAttach": true,
            "onUSBDetach": true
        }
    })
}

/// The `usb-scanner-plugin` manifest: vendor `0x04A9`, product `0x220E`.
#[must_use]
pub fn scanner_manifest() -> Value {
    manifest_json("usb-scanner-plugin", &["0x04A9"], &["0x220E"])
}

/// Validate a manifest document that is known to be valid.
///
/// # Panics
///
/// Panics with the validation errors if the document is invalid.
#[must_use]
pub fn validated(manifest: &Value) -> ValidatedManifest {
    match validate_manifest(manifest) {
        Ok(validated) => validated,
        Err(errors) => panic!("fixture manifest is invalid: {errors}"),
    }
}

/// Write `manifest` as `<root>/<name>/plugin.json` and return the plugin
/// directory.
///
/// # Panics
///
/// Panics on I/O errors.
pub fn write_plugin(root: &Path, manifest: &Value) -> PathBuf {
    let name = manifest["name"].as_str().unwrap_or("plugin");
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("create plugin dir");
    let body = serde_json::to_string_pretty(manifest).expect("serialize manifest");
    std::fs::write(dir.join(JSON_MANIFEST), body).expect("write manifest");
    dir
}
