//! Hotbridge Test - Shared test utilities for the Hotbridge plugin host.
//!
//! This crate provides fixtures and mock plugins that can be used across
//! Hotbridge crates as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! hotbridge-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use hotbridge_test::{RecordingHooks, attach, scanner_manifest};
//!
//! let hooks = RecordingHooks::new();
//! let runtimes = StandardRuntimes::new().with_builtin("usb-scanner-plugin", hooks.clone());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod logging;
pub mod mocks;

pub use fixtures::*;
pub use logging::*;
pub use mocks::*;
