//! Hotbridge Telemetry - Logging for the Hotbridge plugin host.
//!
//! This crate provides:
//! - Configurable `tracing` subscriber setup with multiple formats
//! - Stdout, stderr and rolling-file targets
//!
//! # Example
//!
//! ```rust,no_run
//! use hotbridge_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), hotbridge_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("hotbridge_router=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("host starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
