//! Hotbridge Kernel - the integration orchestrator.
//!
//! [`PluginHost`] wires the device monitor, event publisher, router and
//! plugin sandboxes together, owns every plugin's lifecycle and aggregates
//! health:
//!
//! ```text
//! hotplug source → DeviceMonitor → EventPublisher → event log
//!                                                     │
//!                       Router (one route per plugin) ┘
//!                         │
//!                         └→ SandboxHandle → plugin hooks
//! ```
//!
//! Plugins move through [`PluginState`]s: `load → start → stop → unload`,
//! with `Degraded` plugins restarted or quarantined by the health sweep.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::module_name_repetitions)]

pub mod prelude;

mod config;
mod error;
mod health;
mod host;
mod instance;

pub use config::{HostConfig, sysfs_config};
pub use error::{HostError, HostResult};
pub use health::{HealthReport, PluginHealth};
pub use host::{PluginHost, PluginHostBuilder, SweepAction};
pub use instance::PluginState;
