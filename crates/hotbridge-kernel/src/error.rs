//! Orchestrator errors.

use hotbridge_core::{Fault, FaultKind};
use hotbridge_events::{LogError, PublishError};
use hotbridge_plugin::{ManifestError, PluginId, SandboxError, ValidationErrors};
use hotbridge_router::RouterError;
use thiserror::Error;

use crate::instance::PluginState;

/// Errors returned by [`PluginHost`](crate::PluginHost) operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The manifest could not be read or failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A plugin with the same name is already loaded.
    #[error("plugin {0} is already loaded")]
    AlreadyLoaded(PluginId),

    /// No plugin with this id is loaded.
    #[error("plugin {0} is not loaded")]
    NotFound(PluginId),

    /// The operation is not allowed from the plugin's current state.
    #[error("cannot {operation} plugin {plugin_id} while it is {state}")]
    InvalidTransition {
        /// Plugin concerned.
        plugin_id: PluginId,
        /// Its current state.
        state: PluginState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// The plugin's sandbox failed.
    #[error("plugin {plugin_id}: {source}")]
    Sandbox {
        /// Plugin concerned.
        plugin_id: PluginId,
        /// Sandbox error.
        #[source]
        source: SandboxError,
    },

    /// The router rejected a subscription change.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// The publisher could not be initialized.
    #[error(transparent)]
    Publisher(#[from] PublishError),

    /// The event log failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The host is shutting down.
    #[error("plugin host is shut down")]
    ShutDown,
}

impl HostError {
    /// The structured validation errors of a failed load, if that is what
    /// this error is.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Manifest(e) => e.validation_errors(),
            _ => None,
        }
    }

    /// Summary for health output.
    #[must_use]
    pub fn fault(&self) -> Fault {
        match self {
            Self::Manifest(e) => e.fault(),
            Self::Sandbox { source, .. } => source.fault(),
            Self::Publisher(_) | Self::Log(_) => {
                Fault::new(FaultKind::PublisherUnavailable, self.to_string())
            },
            _ => Fault::new(FaultKind::DeliveryFailure, self.to_string()),
        }
    }

    pub(crate) fn sandbox(plugin_id: &PluginId, source: SandboxError) -> Self {
        Self::Sandbox {
            plugin_id: plugin_id.clone(),
            source,
        }
    }
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
