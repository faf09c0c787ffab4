//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hotbridge_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult};

// Device model
pub use crate::{
    BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, DeviceKey, ProductId, VendorId,
};

// Log records
pub use crate::{EventId, HotplugEvent, LogEntry, Offset};

// Faults and retry
pub use crate::{Fault, FaultKind, RetryConfig};
