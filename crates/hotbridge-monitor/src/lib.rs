//! Hotbridge Monitor - USB hotplug device monitor.
//!
//! The monitor watches one [`HotplugSource`], coalesces bursts of
//! notifications per device with a [`Debouncer`], and hands the surviving
//! descriptors to an [`EventPublisher`](hotbridge_events::EventPublisher).
//!
//! Sources:
//!
//! - [`SysfsSource`] reads `/sys/bus/usb/devices` and watches `/dev/bus/usb`
//! - [`ChannelSource`] is fed by the embedder through a [`ChannelSourceHandle`]

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod debounce;
mod error;
mod monitor;
mod source;
mod sysfs;

pub use debounce::Debouncer;
pub use error::{MonitorError, MonitorResult};
pub use monitor::{DeviceMonitor, MonitorConfig, MonitorState, MonitorStatus};
pub use source::{ChannelSource, ChannelSourceHandle, HotplugSource};
pub use sysfs::{SysfsConfig, SysfsSource};
