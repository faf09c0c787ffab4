//! Host settings assembled from the configuration file.

use std::path::PathBuf;
use std::time::Duration;

use hotbridge_config::Config;
use hotbridge_core::RetryConfig;
use hotbridge_events::PublisherConfig;
use hotbridge_monitor::{MonitorConfig, SysfsConfig};
use hotbridge_plugin::SandboxConfig;
use hotbridge_router::RouterConfig;

/// Settings for a [`PluginHost`](crate::PluginHost).
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Device monitor debounce and retry.
    pub monitor: MonitorConfig,
    /// Publisher buffer and backoff.
    pub publisher: PublisherConfig,
    /// Router batch size and delivery retries.
    pub router: RouterConfig,
    /// Per-plugin sandbox limits.
    pub sandbox: SandboxConfig,
    /// Health sweep period.
    pub health_interval: Duration,
    /// Automatic restarts of a degraded plugin before quarantine.
    pub max_restarts: u32,
    /// Delivery failures that force quarantine.
    pub quarantine_threshold: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            publisher: PublisherConfig::default(),
            router: RouterConfig::default(),
            sandbox: SandboxConfig::default(),
            health_interval: Duration::from_secs(5),
            max_restarts: 3,
            quarantine_threshold: 10,
        }
    }
}

impl HostConfig {
    /// Derive host settings from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let monitor = &config.monitor;
        let publisher = &config.publisher;
        let router = &config.router;
        Self {
            monitor: MonitorConfig {
                debounce: monitor.debounce(),
                retry: RetryConfig::new(
                    monitor.retry_max_attempts,
                    Duration::from_millis(monitor.retry_initial_ms),
                    Duration::from_millis(monitor.retry_max_ms),
                ),
            },
            publisher: PublisherConfig {
                buffer_capacity: publisher.buffer_capacity,
                backoff: RetryConfig::unbounded(
                    Duration::from_millis(publisher.backoff_initial_ms),
                    Duration::from_millis(publisher.backoff_max_ms),
                ),
            },
            router: RouterConfig {
                batch_size: router.batch_size,
                retry: RetryConfig::new(
                    router.max_retries,
                    Duration::from_millis(router.retry_backoff_ms),
                    Duration::from_millis(router.retry_backoff_max_ms),
                ),
            },
            sandbox: SandboxConfig {
                memory_max_bytes: config.sandbox.memory_max_bytes(),
                hook_timeout: config.sandbox.hook_timeout(),
                grace_period: config.sandbox.grace_period(),
            },
            health_interval: config.orchestrator.health_interval(),
            max_restarts: config.orchestrator.max_restarts,
            quarantine_threshold: config.orchestrator.quarantine_threshold,
        }
    }
}

/// Sysfs source settings from the monitor section.
#[must_use]
pub fn sysfs_config(config: &Config) -> SysfsConfig {
    SysfsConfig {
        sysfs_root: PathBuf::from(&config.monitor.sysfs_root),
        devnode_root: PathBuf::from(&config.monitor.devnode_root),
        rescan_interval: config.monitor.rescan_interval(),
    }
}
