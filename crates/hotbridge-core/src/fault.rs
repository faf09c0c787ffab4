//! Fault taxonomy surfaced through health reporting.
//!
//! Each component keeps its own detailed error enum. What crosses component
//! and plugin boundaries is only a [`Fault`]: a kind, a message and a time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// A manifest failed schema validation.
    Validation,
    /// An event or capability use fell outside what a plugin declared.
    PermissionDenied,
    /// A hook delivery failed and may be retried.
    DeliveryFailure,
    /// A plugin raised an error or breached a resource limit.
    SandboxFault,
    /// The event log could not be reached; entries are buffered.
    PublisherUnavailable,
    /// The publisher buffer overflowed and dropped its oldest entry.
    BufferOverflow,
    /// The device monitor stopped because of a platform-level failure.
    DeviceMonitorFault,
}

impl FaultKind {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PermissionDenied => "permission_denied",
            Self::DeliveryFailure => "delivery_failure",
            Self::SandboxFault => "sandbox_fault",
            Self::PublisherUnavailable => "publisher_unavailable",
            Self::BufferOverflow => "buffer_overflow",
            Self::DeviceMonitorFault => "device_monitor_fault",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A summarized fault, safe to show in health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// What went wrong.
    pub kind: FaultKind,
    /// Human-readable detail.
    pub message: String,
    /// When the fault was recorded.
    pub at: DateTime<Utc>,
}

impl Fault {
    /// Record a fault now.
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display_includes_kind() {
        let fault = Fault::new(FaultKind::SandboxFault, "hook deadline exceeded");
        assert_eq!(fault.to_string(), "sandbox_fault: hook deadline exceeded");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&FaultKind::PublisherUnavailable).unwrap();
        assert_eq!(json, "\"publisher_unavailable\"");
    }
}
