//! Hotbridge Events - Durable event log and publisher.
//!
//! The event log is the single resource shared between the device monitor
//! side (through the [`EventPublisher`]) and the router. Two backends are
//! provided:
//!
//! - [`MemoryEventLog`] for tests and ephemeral hosts
//! - [`FileEventLog`] persisting JSON Lines plus consumer offsets
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hotbridge_events::prelude::*;
//!
//! # async fn example(descriptor: hotbridge_core::DeviceDescriptor) -> Result<(), Box<dyn std::error::Error>> {
//! let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::new());
//! let publisher = EventPublisher::new(log.clone(), PublisherConfig::default()).await?;
//! publisher.publish(descriptor).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod file;
mod log;
mod memory;
mod publisher;

pub use error::{LogError, LogResult, PublishError, PublishResult};
pub use file::FileEventLog;
pub use log::EventLog;
pub use memory::MemoryEventLog;
pub use publisher::{
    EventPublisher, PublishOutcome, PublisherConfig, PublisherHealth,
};
