//! Configuration types for the Hotbridge host.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header produces a working
//! configuration. Durations are stored as integer milliseconds and exposed
//! through accessor methods.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for the Hotbridge host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device monitor settings.
    pub monitor: MonitorSection,
    /// Event publisher buffering and backoff.
    pub publisher: PublisherSection,
    /// Event log backend selection.
    pub event_log: EventLogSection,
    /// Router delivery retries.
    pub router: RouterSection,
    /// Per-plugin sandbox limits.
    pub sandbox: SandboxSection,
    /// Plugin lifecycle and health sweep.
    pub orchestrator: OrchestratorSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// MonitorSection
// ---------------------------------------------------------------------------

/// Device monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Coalescing window for repeated notifications about one device.
    pub debounce_ms: u64,
    /// Directory holding one entry per USB device.
    pub sysfs_root: String,
    /// Directory watched for device node creation and removal.
    pub devnode_root: String,
    /// Fallback rescan period when no change notification arrives.
    pub rescan_interval_ms: u64,
    /// First delay when retrying a transient read error.
    pub retry_initial_ms: u64,
    /// Cap on the transient read retry delay.
    pub retry_max_ms: u64,
    /// Consecutive transient errors tolerated before the monitor gives up.
    pub retry_max_attempts: u32,
}

impl MonitorSection {
    /// Debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Rescan interval.
    #[must_use]
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            sysfs_root: "/sys/bus/usb/devices".to_owned(),
            devnode_root: "/dev/bus/usb".to_owned(),
            rescan_interval_ms: 2000,
            retry_initial_ms: 100,
            retry_max_ms: 5000,
            retry_max_attempts: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// PublisherSection
// ---------------------------------------------------------------------------

/// Event publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSection {
    /// Entries held locally while the log is unreachable.
    pub buffer_capacity: usize,
    /// First retry delay after an append failure.
    pub backoff_initial_ms: u64,
    /// Cap on the append retry delay.
    pub backoff_max_ms: u64,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            backoff_initial_ms: 100,
            backoff_max_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// EventLogSection
// ---------------------------------------------------------------------------

/// Event log storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// In-memory log, lost on restart.
    Memory,
    /// Append-only JSON Lines file plus an offsets file.
    #[default]
    File,
}

/// Event log configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogSection {
    /// Which backend to use.
    pub backend: LogBackend,
    /// Directory for the file backend. `None` means `~/.hotbridge/log`.
    pub directory: Option<String>,
}

impl EventLogSection {
    /// Resolve the file backend directory against a home directory.
    #[must_use]
    pub fn resolve_directory(&self, home: &Path) -> PathBuf {
        match &self.directory {
            Some(dir) => expand_home(dir, home),
            None => home.join(".hotbridge").join("log"),
        }
    }
}

fn expand_home(raw: &str, home: &Path) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None if raw == "~" => home.to_path_buf(),
        None => PathBuf::from(raw),
    }
}

// ---------------------------------------------------------------------------
// RouterSection
// ---------------------------------------------------------------------------

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Delivery retries before a plugin is marked degraded.
    pub max_retries: u32,
    /// First delay between delivery attempts.
    pub retry_backoff_ms: u64,
    /// Cap on the delivery retry delay.
    pub retry_backoff_max_ms: u64,
    /// Log entries read per poll.
    pub batch_size: usize,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 200,
            retry_backoff_max_ms: 5000,
            batch_size: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxSection
// ---------------------------------------------------------------------------

/// Per-plugin sandbox limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Memory ceiling in megabytes.
    pub memory_max_mb: u64,
    /// Deadline for a single hook invocation.
    pub hook_timeout_ms: u64,
    /// Time an in-flight hook may finish after termination is requested.
    pub grace_period_ms: u64,
}

impl SandboxSection {
    /// Memory ceiling in bytes.
    #[must_use]
    pub fn memory_max_bytes(&self) -> u64 {
        self.memory_max_mb.saturating_mul(1024 * 1024)
    }

    /// Hook deadline.
    #[must_use]
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Termination grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            memory_max_mb: 64,
            hook_timeout_ms: 5000,
            grace_period_ms: 2000,
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestratorSection
// ---------------------------------------------------------------------------

/// Plugin lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Health sweep period.
    pub health_interval_ms: u64,
    /// Automatic restarts of a degraded plugin before it is quarantined.
    pub max_restarts: u32,
    /// Total delivery failures that force quarantine.
    pub quarantine_threshold: u64,
    /// Directories scanned for plugin manifests at daemon start.
    pub plugin_dirs: Vec<String>,
}

impl OrchestratorSection {
    /// Health sweep period.
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Plugin directories with `~` expanded against `home`.
    #[must_use]
    pub fn resolve_plugin_dirs(&self, home: &Path) -> Vec<PathBuf> {
        self.plugin_dirs
            .iter()
            .map(|dir| expand_home(dir, home))
            .collect()
    }
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            health_interval_ms: 5000,
            max_restarts: 3,
            quarantine_threshold: 10,
            plugin_dirs: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["hotbridge_router=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_sections_use_defaults() {
        let config: Config = toml::from_str("[monitor]\n[router]\n").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn log_directory_defaults_under_home() {
        let section = EventLogSection::default();
        assert_eq!(
            section.resolve_directory(Path::new("/home/u")),
            PathBuf::from("/home/u/.hotbridge/log")
        );

        let section = EventLogSection {
            directory: Some("~/state/events".to_owned()),
            ..EventLogSection::default()
        };
        assert_eq!(
            section.resolve_directory(Path::new("/home/u")),
            PathBuf::from("/home/u/state/events")
        );
    }

    #[test]
    fn sandbox_memory_in_bytes() {
        let section = SandboxSection {
            memory_max_mb: 2,
            ..SandboxSection::default()
        };
        assert_eq!(section.memory_max_bytes(), 2 * 1024 * 1024);
    }
}
