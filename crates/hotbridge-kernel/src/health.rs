//! Aggregated health output.

use chrono::{DateTime, Utc};
use hotbridge_core::Fault;
use hotbridge_events::PublisherHealth;
use hotbridge_monitor::{MonitorState, MonitorStatus};
use hotbridge_plugin::{PluginId, SandboxStats};
use hotbridge_router::RouteStats;
use serde::{Deserialize, Serialize};

use crate::instance::PluginState;

/// Health of one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHealth {
    /// Plugin id.
    pub id: PluginId,
    /// Manifest version.
    pub version: String,
    /// Lifecycle state.
    pub state: PluginState,
    /// Force-stopped by the health sweep.
    pub quarantined: bool,
    /// Delivery failures since load.
    pub failures: u64,
    /// Automatic restarts since load.
    pub restarts: u32,
    /// Most recent failure.
    pub last_error: Option<Fault>,
    /// Router counters, while subscribed.
    pub route: Option<RouteStats>,
    /// Sandbox counters, while a sandbox exists.
    pub sandbox: Option<SandboxStats>,
    /// When the plugin was loaded.
    pub loaded_at: DateTime<Utc>,
}

impl PluginHealth {
    /// Whether the plugin is in a failure state.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.quarantined || self.state == PluginState::Degraded
    }
}

/// Health of the whole host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// True when publisher, monitor and every plugin are healthy.
    pub healthy: bool,
    /// When the report was taken.
    pub generated_at: DateTime<Utc>,
    /// Publisher health.
    pub publisher: PublisherHealth,
    /// Device monitor status, if a monitor is running.
    pub monitor: Option<MonitorStatus>,
    /// Installed router subscriptions.
    pub routes: usize,
    /// Per-plugin health, ordered by id.
    pub plugins: Vec<PluginHealth>,
}

impl HealthReport {
    pub(crate) fn new(
        publisher: PublisherHealth,
        monitor: Option<MonitorStatus>,
        routes: usize,
        mut plugins: Vec<PluginHealth>,
    ) -> Self {
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        let monitor_ok = monitor
            .as_ref()
            .is_none_or(|m| m.state != MonitorState::Failed);
        let healthy =
            publisher.healthy && monitor_ok && !plugins.iter().any(PluginHealth::is_unhealthy);
        Self {
            healthy,
            generated_at: Utc::now(),
            publisher,
            monitor,
            routes,
            plugins,
        }
    }

    /// Health of one plugin.
    #[must_use]
    pub fn plugin(&self, id: &PluginId) -> Option<&PluginHealth> {
        self.plugins.iter().find(|p| &p.id == id)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
