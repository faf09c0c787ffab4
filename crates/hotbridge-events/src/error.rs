//! Event log and publisher errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by an [`EventLog`](crate::EventLog) backend.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log cannot currently accept or serve requests.
    #[error("event log unavailable: {0}")]
    Unavailable(String),

    /// Filesystem failure in the file backend.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be decoded.
    #[error("corrupt log record at line {line}: {message}")]
    Corrupt {
        /// One-based line number in the segment file.
        line: usize,
        /// Decoder message.
        message: String,
    },

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for event log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors raised by the [`EventPublisher`](crate::EventPublisher).
#[derive(Debug, Error)]
pub enum PublishError {
    /// The publisher has been shut down and accepts no more events.
    #[error("publisher is shut down")]
    Closed,

    /// Initial state could not be read from the log.
    #[error("failed to initialize publisher: {0}")]
    Init(#[source] LogError),
}

/// Result type for publisher operations.
pub type PublishResult<T> = Result<T, PublishError>;
