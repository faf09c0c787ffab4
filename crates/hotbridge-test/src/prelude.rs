//! Prelude module - commonly used test helpers.
//!
//! Use `use hotbridge_test::prelude::*;` in test modules.

pub use crate::{Invocation, RecordingHooks, setup_test_logging};

pub use crate::{
    SCANNER_PRODUCT, SCANNER_VENDOR, attach, detach, device, event, manifest_json,
    scanner_manifest, validated, write_plugin,
};
