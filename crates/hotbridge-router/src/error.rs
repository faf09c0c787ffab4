//! Router errors.

use hotbridge_events::LogError;
use hotbridge_plugin::PluginId;
use thiserror::Error;

/// Errors returned by [`Router`](crate::Router) operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The plugin already has a live subscription.
    #[error("plugin {0} is already subscribed")]
    AlreadySubscribed(PluginId),

    /// The plugin has no subscription.
    #[error("plugin {0} is not subscribed")]
    NotSubscribed(PluginId),

    /// The router has been shut down.
    #[error("router is shut down")]
    ShutDown,

    /// The event log rejected a cursor lookup or commit.
    #[error("event log error: {0}")]
    Log(#[from] LogError),
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;
