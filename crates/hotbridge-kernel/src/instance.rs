//! Loaded plugin bookkeeping.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hotbridge_core::Fault;
use hotbridge_plugin::{DeviceFilter, PluginId, PluginManifest, SandboxHandle};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a plugin.
///
/// ```text
/// Unloaded ──load──→ Loaded ──start──→ Running ──stop──→ Stopped
///                                       │   ▲
///                route degraded or      │   │
///              failure threshold hit    ▼   │ restart
///                                     Degraded ──threshold or restarts exhausted──→ Stopped (quarantined)
/// ```
///
/// A plugin is only quarantined from `Degraded`; the health sweep degrades a
/// running plugin first when its failure count reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// Not registered with the host.
    Unloaded,
    /// Validated and sandboxed, not yet receiving events.
    Loaded,
    /// `onLoad` succeeded and the filter is installed.
    Running,
    /// Deliveries are failing; the route is paused.
    Degraded,
    /// Stopped by request or quarantined.
    Stopped,
}

impl PluginState {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One loaded plugin.
#[derive(Debug)]
pub(crate) struct PluginInstance {
    pub(crate) id: PluginId,
    pub(crate) manifest: Arc<PluginManifest>,
    pub(crate) plugin_dir: PathBuf,
    pub(crate) filter: DeviceFilter,
    pub(crate) sandbox: Option<Arc<SandboxHandle>>,
    pub(crate) state: PluginState,
    pub(crate) failures: u64,
    pub(crate) restarts: u32,
    pub(crate) quarantined: bool,
    pub(crate) last_error: Option<Fault>,
    pub(crate) loaded_at: DateTime<Utc>,
}

impl PluginInstance {
    pub(crate) fn new(
        manifest: Arc<PluginManifest>,
        plugin_dir: PathBuf,
        filter: DeviceFilter,
        sandbox: Arc<SandboxHandle>,
    ) -> Self {
        Self {
            id: manifest.name.clone(),
            manifest,
            plugin_dir,
            filter,
            sandbox: Some(sandbox),
            state: PluginState::Loaded,
            failures: 0,
            restarts: 0,
            quarantined: false,
            last_error: None,
            loaded_at: Utc::now(),
        }
    }

    /// Move `Running` to `Degraded`. Returns whether the state changed.
    pub(crate) fn degrade(&mut self) -> bool {
        if self.state == PluginState::Running {
            self.state = PluginState::Degraded;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_failure(&mut self, fault: Fault) {
        self.failures = self.failures.saturating_add(1);
        self.last_error = Some(fault);
    }
}
