//! Hotbridge Router - the event bridge between the log and plugin sandboxes.
//!
//! Each [`Subscription`] pairs a plugin's compiled device filter with a
//! [`DeliveryTarget`] (normally its sandbox). The [`Router`] runs one task
//! per subscription, delivers matching events with at-least-once semantics
//! and reports failures through [`RouterNotice`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod router;
mod stats;
mod target;

pub use error::{RouterError, RouterResult};
pub use router::{Router, RouterConfig, RouterNotice};
pub use stats::RouteStats;
pub use target::{DeliveryTarget, Subscription};
