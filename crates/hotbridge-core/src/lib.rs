//! Hotbridge Core - Foundation types for the Hotbridge plugin host.
//!
//! This crate provides:
//! - Device identity types (`VendorId`, `ProductId`, `DeviceClass`, `BusLocation`)
//! - The immutable [`DeviceDescriptor`] emitted by the device monitor
//! - The [`HotplugEvent`] log record and its wire format
//! - The fault taxonomy surfaced through health reporting
//! - Retry/backoff configuration shared by the monitor, publisher and router

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod device;
pub mod error;
pub mod event;
pub mod fault;
pub mod retry;

pub use device::{
    BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, DeviceKey, ProductId, VendorId,
};
pub use error::{CoreError, CoreResult};
pub use event::{EventId, HotplugEvent, LogEntry, Offset};
pub use fault::{Fault, FaultKind};
pub use retry::RetryConfig;
