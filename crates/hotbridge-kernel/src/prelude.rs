//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hotbridge_kernel::prelude::*;` to import all essential types.

pub use crate::{HostError, HostResult};

pub use crate::{HealthReport, HostConfig, PluginHealth, PluginHost, PluginHostBuilder, PluginState, SweepAction};
