//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hotbridge_monitor::prelude::*;` to import all essential types.

pub use crate::{MonitorError, MonitorResult};

pub use crate::{DeviceMonitor, MonitorConfig, MonitorState, MonitorStatus};

pub use crate::{ChannelSource, ChannelSourceHandle, HotplugSource, SysfsConfig, SysfsSource};
