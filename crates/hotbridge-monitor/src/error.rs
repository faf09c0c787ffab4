//! Device monitor errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by hotplug sources and the device monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The platform refused access to the hotplug bus. Fatal to the monitor.
    #[error("permission denied reading {path}: {source}")]
    PermissionDenied {
        /// Path that could not be accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The hotplug bus does not exist on this host. Fatal to the monitor.
    #[error("hotplug source unavailable at {path}: {source}")]
    Unavailable {
        /// Path that was expected to exist.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A read failed in a way that may succeed on retry.
    #[error("transient read error: {0}")]
    Transient(String),

    /// Transient errors persisted past the retry limit.
    #[error("giving up after {attempts} consecutive read errors: {last}")]
    RetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
        /// Last error message.
        last: String,
    },

    /// The event publisher stopped accepting events.
    #[error("publisher closed")]
    PublisherClosed,
}

impl MonitorError {
    /// Whether the monitor should retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
