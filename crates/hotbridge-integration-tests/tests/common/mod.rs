//! Shared test harness for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hotbridge_core::RetryConfig;
use hotbridge_events::EventLog;
use hotbridge_kernel::{HostConfig, PluginHost};
use hotbridge_monitor::{ChannelSource, ChannelSourceHandle, MonitorConfig};
use hotbridge_plugin::{PluginHooks, PluginId, SandboxConfig, StandardRuntimes};
use hotbridge_router::RouterConfig;
use hotbridge_test::{RecordingHooks, setup_test_logging, write_plugin};
use serde_json::Value;
use tempfile::TempDir;

/// Host settings with short timeouts and no periodic health sweep.
pub fn test_config() -> HostConfig {
    HostConfig {
        monitor: MonitorConfig {
            debounce: Duration::from_millis(20),
            ..MonitorConfig::default()
        },
        router: RouterConfig {
            batch_size: 32,
            retry: RetryConfig::new(2, Duration::from_millis(5), Duration::from_millis(20)),
        },
        sandbox: SandboxConfig {
            memory_max_bytes: 64 * 1024 * 1024,
            hook_timeout: Duration::from_millis(300),
            grace_period: Duration::from_millis(100),
        },
        health_interval: Duration::from_secs(3600),
        ..HostConfig::default()
    }
}

/// A running host fed by a channel device source, with a scratch directory
/// for plugin manifests.
pub struct Harness {
    /// The host under test.
    pub host: PluginHost,
    /// Injects device notifications into the monitor.
    pub devices: ChannelSourceHandle,
    /// Plugin directories live here.
    pub root: TempDir,
}

impl Harness {
    /// Start a host with the given built-in plugins registered by name.
    pub async fn start(plugins: &[(&str, Arc<RecordingHooks>)]) -> Self {
        Self::build(test_config(), None, plugins).await
    }

    /// Start a host with explicit settings and an optional event log.
    pub async fn build(
        config: HostConfig,
        log: Option<Arc<dyn EventLog>>,
        plugins: &[(&str, Arc<RecordingHooks>)],
    ) -> Self {
        let runtimes = StandardRuntimes::new();
        for (name, hooks) in plugins {
            runtimes.register_builtin(*name, Arc::clone(hooks) as Arc<dyn PluginHooks>);
        }
        Self::with_runtimes(config, log, runtimes).await
    }

    /// Start a host with a prepared runtime factory.
    pub async fn with_runtimes(
        config: HostConfig,
        log: Option<Arc<dyn EventLog>>,
        runtimes: StandardRuntimes,
    ) -> Self {
        setup_test_logging();
        let (source, devices) = ChannelSource::new(64);
        let mut builder = PluginHost::builder()
            .config(config)
            .runtimes(Arc::new(runtimes))
            .source(Box::new(source));
        if let Some(log) = log {
            builder = builder.event_log(log);
        }
        let host = builder.start().await.expect("host failed to start");
        Self {
            host,
            devices,
            root: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    /// Write, load and start a plugin.
    pub async fn install(&self, manifest: &Value) -> PluginId {
        let dir = write_plugin(self.root.path(), manifest);
        let id = self.host.load_plugin(&dir).await.expect("load failed");
        self.host.start_plugin(&id).await.expect("start failed");
        id
    }

    /// Wait until every route has consumed the whole log.
    pub async fn drain(&self) {
        let head_log = Arc::clone(self.host.event_log());
        let ids = self.host.plugin_ids();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let head = head_log.head().await.expect("head");
                let mut done = true;
                for id in &ids {
                    let cursor = self.host.router().cursor(id).await.expect("cursor");
                    if cursor.unwrap_or(0) < head {
                        done = false;
                    }
                }
                if done {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("routes did not drain in time");
    }

    /// Stop the host.
    pub async fn shutdown(self) {
        self.host.shutdown().await;
    }
}

/// Poll `check` until it holds.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(timeout, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
