//! Error types for manifests and sandboxes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use hotbridge_core::{Fault, FaultKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::HookKind;

/// One schema violation, located by a dotted field path such as
/// `permissions.usb.vendor_ids[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field path of the offending value.
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationIssue {
    /// Create an issue.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Ordered list of schema violations. Never empty when returned as an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<ValidationIssue>);

impl ValidationErrors {
    pub(crate) fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationIssue::new(path, message));
    }

    /// The issues in the order they were found.
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.0
    }

    /// Whether any issue is located exactly at `path`.
    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.0.iter().any(|i| i.path == path)
    }

    /// Number of issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no issues.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationIssue;
    type IntoIter = std::slice::Iter<'a, ValidationIssue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Errors raised while locating, reading or validating a manifest file.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file exceeds the manifest size limit.
    #[error("manifest {path} is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Manifest path.
        path: PathBuf,
        /// Actual size.
        size: u64,
        /// Allowed size.
        limit: u64,
    },

    /// The file is not well-formed JSON or TOML.
    #[error("failed to parse manifest {path}: {message}")]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// No manifest file was found at or under the path.
    #[error("no plugin.json or Plugin.toml found at {0}")]
    NotFound(PathBuf),

    /// The document violates the manifest schema.
    #[error("invalid manifest {path}: {errors}")]
    Invalid {
        /// Manifest path.
        path: PathBuf,
        /// Every violation, in document order.
        errors: ValidationErrors,
    },
}

impl ManifestError {
    /// Schema violations, if this is a validation failure.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Invalid { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// Summary for health output.
    #[must_use]
    pub fn fault(&self) -> Fault {
        Fault::new(FaultKind::Validation, self.to_string())
    }
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Errors raised by a plugin sandbox.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SandboxError {
    /// The plugin entry point could not be loaded.
    #[error("failed to load plugin entry point: {0}")]
    Load(String),

    /// The hook ran past its execution deadline and was aborted.
    #[error("{hook} exceeded its {deadline:?} deadline")]
    DeadlineExceeded {
        /// Hook that was running.
        hook: HookKind,
        /// Budget that was exceeded.
        deadline: Duration,
    },

    /// The plugin grew past its memory ceiling.
    #[error("memory use {used} bytes exceeds ceiling of {limit} bytes")]
    MemoryExceeded {
        /// Bytes in use after the invocation.
        used: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// The hook returned an error result.
    #[error("{hook} failed: {message}")]
    HookFailed {
        /// Hook that failed.
        hook: HookKind,
        /// Error reported by the plugin.
        message: String,
    },

    /// The hook panicked or trapped.
    #[error("{hook} crashed: {message}")]
    Crashed {
        /// Hook that crashed.
        hook: HookKind,
        /// Panic or trap message.
        message: String,
    },

    /// The call was refused by the capability gate or the device filter.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The sandbox has been terminated; its channel is closed.
    #[error("sandbox terminated")]
    Terminated,

    /// Payload encoding failed on the host side.
    #[error("payload error: {0}")]
    Payload(String),
}

impl SandboxError {
    /// Fault classification for this error.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::PermissionDenied(_) => FaultKind::PermissionDenied,
            Self::Terminated | Self::Payload(_) => FaultKind::DeliveryFailure,
            Self::Load(_)
            | Self::DeadlineExceeded { .. }
            | Self::MemoryExceeded { .. }
            | Self::HookFailed { .. }
            | Self::Crashed { .. } => FaultKind::SandboxFault,
        }
    }

    /// Summary for health output and router bookkeeping.
    #[must_use]
    pub fn fault(&self) -> Fault {
        Fault::new(self.kind(), self.to_string())
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
