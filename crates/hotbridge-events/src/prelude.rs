//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hotbridge_events::prelude::*;` to import all essential types.

// Errors
pub use crate::{LogError, LogResult, PublishError, PublishResult};

// Log
pub use crate::{EventLog, FileEventLog, MemoryEventLog};

// Publisher
pub use crate::{EventPublisher, PublishOutcome, PublisherConfig, PublisherHealth};
