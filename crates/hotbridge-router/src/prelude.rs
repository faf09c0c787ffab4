//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hotbridge_router::prelude::*;` to import all essential types.

pub use crate::{RouterError, RouterResult};

pub use crate::{DeliveryTarget, RouteStats, Router, RouterConfig, RouterNotice, Subscription};
