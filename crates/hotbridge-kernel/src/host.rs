//! The plugin host.
//!
//! Start order:
//!
//! 1. event log and [`EventPublisher`] (plus its retry loop)
//! 2. [`Router`] and the loop consuming its notices
//! 3. [`DeviceMonitor`], once the publisher can take events
//! 4. the periodic health sweep
//!
//! Plugins can be loaded once [`PluginHostBuilder::start`] returns, so the
//! router is always ready before a filter is installed. Shutdown runs the
//! same steps in reverse.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hotbridge_events::{EventLog, EventPublisher, MemoryEventLog};
use hotbridge_monitor::{DeviceMonitor, HotplugSource, MonitorStatus};
use hotbridge_plugin::{
    DeviceFilter, HookKind, PluginId, PluginManifest, QueueHub, RuntimeContext, RuntimeFactory,
    SandboxHandle, SandboxResult, StandardRuntimes, ValidatedManifest, discover_manifests,
    load_manifest,
};
use hotbridge_router::{Router, RouterError, RouterNotice, Subscription};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::health::{HealthReport, PluginHealth};
use crate::instance::{PluginInstance, PluginState};

/// What the health sweep did to a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "plugin_id", rename_all = "snake_case")]
pub enum SweepAction {
    /// A running plugin crossed the failure threshold and was degraded.
    Degraded(PluginId),
    /// A degraded plugin was restarted.
    Restarted(PluginId),
    /// A restart was attempted and failed; the plugin stays degraded.
    RestartFailed(PluginId),
    /// The plugin was force-stopped and flagged.
    Quarantined(PluginId),
}

/// Builder for [`PluginHost`].
pub struct PluginHostBuilder {
    config: HostConfig,
    log: Option<Arc<dyn EventLog>>,
    source: Option<Box<dyn HotplugSource>>,
    runtimes: Option<Arc<dyn RuntimeFactory>>,
    queues: QueueHub,
}

impl PluginHostBuilder {
    /// Builder with default settings, an in-memory log and no device source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HostConfig::default(),
            log: None,
            source: None,
            runtimes: None,
            queues: QueueHub::default(),
        }
    }

    /// Use these settings.
    #[must_use]
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this event log.
    #[must_use]
    pub fn event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Watch this hotplug source. Without one no monitor is started.
    #[must_use]
    pub fn source(mut self, source: Box<dyn HotplugSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Build plugin runtimes with this factory.
    #[must_use]
    pub fn runtimes(mut self, runtimes: Arc<dyn RuntimeFactory>) -> Self {
        self.runtimes = Some(runtimes);
        self
    }

    /// Share this queue hub with plugins.
    #[must_use]
    pub fn queues(mut self, queues: QueueHub) -> Self {
        self.queues = queues;
        self
    }

    /// Start every component in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the publisher cannot read its initial state from
    /// the log. A device monitor failure does not fail startup; it shows up
    /// in health output.
    pub async fn start(self) -> HostResult<PluginHost> {
        let log = self
            .log
            .unwrap_or_else(|| Arc::new(MemoryEventLog::new()));
        let runtimes = self
            .runtimes
            .unwrap_or_else(|| Arc::new(StandardRuntimes::new()));
        let background = CancellationToken::new();
        let mut tasks = Vec::new();

        let publisher = Arc::new(EventPublisher::new(Arc::clone(&log), self.config.publisher).await?);
        tasks.push(publisher.spawn_retry_loop(background.child_token()));
        info!("event publisher ready");

        let (router, notices) = Router::new(Arc::clone(&log), self.config.router);
        let monitor = self
            .source
            .map(|source| DeviceMonitor::new(source, Arc::clone(&publisher), self.config.monitor));
        let inner = Arc::new(HostInner {
            config: self.config,
            log,
            publisher,
            router,
            runtimes,
            queues: self.queues,
            plugins: DashMap::new(),
            monitor: monitor.as_ref().map(DeviceMonitor::status),
            closed: AtomicBool::new(false),
        });
        tasks.push(tokio::spawn(notice_loop(
            Arc::clone(&inner),
            notices,
            background.child_token(),
        )));
        info!("router ready");

        let monitor_cancel = CancellationToken::new();
        let monitor_task = monitor.map(|monitor| {
            let cancel = monitor_cancel.clone();
            info!("device monitor started");
            tokio::spawn(async move {
                if let Err(e) = monitor.run(cancel).await {
                    error!(error = %e, "device monitor stopped");
                }
            })
        });

        let host = PluginHost {
            inner,
            background,
            monitor_cancel,
            monitor_task: Mutex::new(monitor_task),
            tasks: Mutex::new(tasks),
        };
        host.spawn_health_loop().await;
        Ok(host)
    }
}

impl Default for PluginHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates the monitor, publisher, router and plugin sandboxes.
pub struct PluginHost {
    inner: Arc<HostInner>,
    background: CancellationToken,
    monitor_cancel: CancellationToken,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PluginHost {
    /// Start building a host.
    #[must_use]
    pub fn builder() -> PluginHostBuilder {
        PluginHostBuilder::new()
    }

    /// The publisher feeding the event log.
    #[must_use]
    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.inner.publisher
    }

    /// The event log.
    #[must_use]
    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.inner.log
    }

    /// The router.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// The queue hub shared with plugins.
    #[must_use]
    pub fn queues(&self) -> &QueueHub {
        &self.inner.queues
    }

    /// Read, validate and sandbox the plugin at `path` (a manifest file or a
    /// plugin directory). The plugin is left `Loaded`.
    ///
    /// # Errors
    ///
    /// Returns the structured validation errors for an invalid manifest,
    /// [`HostError::AlreadyLoaded`] for a duplicate name, or the sandbox
    /// error if the entry point cannot be loaded. Nothing stays registered
    /// after a failure.
    pub async fn load_plugin(&self, path: impl AsRef<Path>) -> HostResult<PluginId> {
        self.inner.ensure_open()?;
        let loaded = load_manifest(path.as_ref()).inspect_err(|e| {
            warn!(path = %path.as_ref().display(), error = %e, "plugin load rejected");
        })?;
        self.inner
            .load_validated(loaded.validated, loaded.plugin_dir)
            .await
    }

    /// Load an already validated manifest.
    ///
    /// # Errors
    ///
    /// As [`load_plugin`](Self::load_plugin), minus validation.
    pub async fn load_validated(
        &self,
        validated: ValidatedManifest,
        plugin_dir: impl Into<PathBuf>,
    ) -> HostResult<PluginId> {
        self.inner.ensure_open()?;
        self.inner
            .load_validated(validated, plugin_dir.into())
            .await
    }

    /// Load every valid plugin found under `dirs`. Failures are logged and
    /// skipped.
    pub async fn load_discovered(&self, dirs: &[PathBuf]) -> Vec<PluginId> {
        let mut loaded = Vec::new();
        for manifest in discover_manifests(dirs) {
            let path = manifest.manifest_path.clone();
            match self
                .inner
                .load_validated(manifest.validated, manifest.plugin_dir)
                .await
            {
                Ok(id) => loaded.push(id),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping plugin"),
            }
        }
        loaded
    }

    /// `Loaded → Running`: invoke `onLoad`, then install the filter.
    ///
    /// # Errors
    ///
    /// Fails from any other state, or if `onLoad` fails (the plugin stays
    /// `Loaded`).
    pub async fn start_plugin(&self, id: &PluginId) -> HostResult<()> {
        self.inner.ensure_open()?;
        let instance = self.inner.instance(id)?;
        let mut instance = instance.lock().await;
        instance_transition(&instance, "start", &[PluginState::Loaded])?;
        self.inner.activate(&mut instance).await
    }

    /// `Running | Degraded → Stopped`: remove the filter, invoke `onUnload`
    /// and release the sandbox.
    ///
    /// # Errors
    ///
    /// Fails from any other state.
    pub async fn stop_plugin(&self, id: &PluginId) -> HostResult<()> {
        let instance = self.inner.instance(id)?;
        let mut instance = instance.lock().await;
        instance_transition(
            &instance,
            "stop",
            &[PluginState::Running, PluginState::Degraded],
        )?;
        self.inner.deactivate(&mut instance, true).await;
        Ok(())
    }

    /// Stop the plugin if needed and forget it.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`] for unknown ids.
    pub async fn unload_plugin(&self, id: &PluginId) -> HostResult<()> {
        self.inner.unload(id).await
    }

    /// `Degraded → Running` with a fresh sandbox.
    ///
    /// # Errors
    ///
    /// Fails from any other state, or if the new sandbox cannot start (the
    /// plugin stays `Degraded`).
    pub async fn restart_plugin(&self, id: &PluginId) -> HostResult<()> {
        self.inner.ensure_open()?;
        let instance = self.inner.instance(id)?;
        let mut instance = instance.lock().await;
        instance_transition(&instance, "restart", &[PluginState::Degraded])?;
        self.inner.restart(&mut instance).await
    }

    /// Current state of a plugin; `Unloaded` for unknown ids.
    pub async fn plugin_state(&self, id: &PluginId) -> PluginState {
        match self.inner.instance(id) {
            Ok(instance) => instance.lock().await.state,
            Err(_) => PluginState::Unloaded,
        }
    }

    /// Ids of loaded plugins, sorted.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<PluginId> {
        self.inner.plugin_ids()
    }

    /// Apply the quarantine and restart policy once.
    ///
    /// Plugins at the failure threshold are quarantined, passing through
    /// `Degraded` if they were still running. Other degraded plugins are
    /// restarted until `max_restarts` is used up, then quarantined.
    pub async fn sweep(&self) -> Vec<SweepAction> {
        self.inner.sweep().await
    }

    /// Aggregate health of every component and plugin.
    pub async fn health(&self) -> HealthReport {
        self.inner.health().await
    }

    /// Stop the monitor, every plugin, the router and the publisher.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("plugin host shutting down");

        self.monitor_cancel.cancel();
        if let Some(task) = self.monitor_task.lock().await.take() {
            let _ = task.await;
        }

        for id in self.inner.plugin_ids() {
            if let Err(e) = self.inner.unload(&id).await {
                warn!(plugin_id = %id, error = %e, "failed to unload plugin during shutdown");
            }
        }
        self.inner.router.shutdown().await;

        if !self.inner.publisher.flush().await {
            warn!("event log unreachable at shutdown, buffered events not persisted");
        }
        self.inner.publisher.close();

        self.background.cancel();
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }
        info!("plugin host stopped");
    }

    async fn spawn_health_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.background.child_token();
        let period = inner.config.health_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {},
                }
                for action in inner.sweep().await {
                    info!(action = ?action, "health sweep");
                }
                let report = inner.health().await;
                if report.healthy {
                    debug!(plugins = report.plugins.len(), "host healthy");
                } else {
                    let unhealthy: Vec<&str> = report
                        .plugins
                        .iter()
                        .filter(|p| p.is_unhealthy())
                        .map(|p| p.id.as_str())
                        .collect();
                    warn!(
                        publisher_healthy = report.publisher.healthy,
                        unhealthy_plugins = ?unhealthy,
                        "host unhealthy"
                    );
                }
            }
        });
        self.tasks.lock().await.push(task);
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.inner.plugins.len())
            .field("router", &self.inner.router)
            .finish_non_exhaustive()
    }
}

fn instance_transition(
    instance: &PluginInstance,
    operation: &'static str,
    allowed: &[PluginState],
) -> HostResult<()> {
    if allowed.contains(&instance.state) {
        Ok(())
    } else {
        Err(HostError::InvalidTransition {
            plugin_id: instance.id.clone(),
            state: instance.state,
            operation,
        })
    }
}

struct HostInner {
    config: HostConfig,
    log: Arc<dyn EventLog>,
    publisher: Arc<EventPublisher>,
    router: Router,
    runtimes: Arc<dyn RuntimeFactory>,
    queues: QueueHub,
    plugins: DashMap<PluginId, Arc<Mutex<PluginInstance>>>,
    monitor: Option<watch::Receiver<MonitorStatus>>,
    closed: AtomicBool,
}

impl HostInner {
    fn ensure_open(&self) -> HostResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(HostError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn instance(&self, id: &PluginId) -> HostResult<Arc<Mutex<PluginInstance>>> {
        self.plugins
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::NotFound(id.clone()))
    }

    fn plugin_ids(&self) -> Vec<PluginId> {
        let mut ids: Vec<PluginId> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn spawn_sandbox(
        &self,
        manifest: &Arc<PluginManifest>,
        plugin_dir: &Path,
        filter: &DeviceFilter,
    ) -> SandboxResult<Arc<SandboxHandle>> {
        let ctx = RuntimeContext::new(
            Arc::clone(manifest),
            plugin_dir,
            self.config.sandbox,
            self.queues.clone(),
        );
        let sandbox = SandboxHandle::spawn(self.runtimes.as_ref(), ctx, filter.clone()).await?;
        Ok(Arc::new(sandbox))
    }

    async fn load_validated(
        &self,
        validated: ValidatedManifest,
        plugin_dir: PathBuf,
    ) -> HostResult<PluginId> {
        let (manifest, filter) = validated.into_parts();
        let id = manifest.name.clone();
        if self.plugins.contains_key(&id) {
            return Err(HostError::AlreadyLoaded(id));
        }

        let manifest = Arc::new(manifest);
        let sandbox = self
            .spawn_sandbox(&manifest, &plugin_dir, &filter)
            .await
            .map_err(|e| {
                warn!(plugin_id = %id, error = %e, "plugin sandbox failed to load");
                HostError::sandbox(&id, e)
            })?;

        let instance = PluginInstance::new(Arc::clone(&manifest), plugin_dir, filter, sandbox);
        match self.plugins.entry(id.clone()) {
            Entry::Occupied(_) => {
                if let Some(sandbox) = &instance.sandbox {
                    sandbox.terminate().await;
                }
                Err(HostError::AlreadyLoaded(id))
            },
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(instance)));
                info!(
                    plugin_id = %id,
                    version = %manifest.version,
                    entry = %manifest.entry,
                    "plugin loaded"
                );
                Ok(id)
            },
        }
    }

    async fn activate(&self, instance: &mut PluginInstance) -> HostResult<()> {
        let Some(sandbox) = instance.sandbox.clone() else {
            return Err(HostError::InvalidTransition {
                plugin_id: instance.id.clone(),
                state: instance.state,
                operation: "start",
            });
        };

        if let Err(e) = sandbox.invoke_lifecycle(HookKind::OnLoad).await {
            warn!(plugin_id = %instance.id, error = %e, "onLoad failed");
            instance.record_failure(e.fault());
            return Err(HostError::sandbox(&instance.id, e));
        }

        self.router
            .subscribe(Subscription::for_sandbox(sandbox, instance.filter.clone()))
            .await?;
        instance.state = PluginState::Running;
        info!(plugin_id = %instance.id, "plugin running");
        Ok(())
    }

    async fn unsubscribe(&self, id: &PluginId) {
        match self.router.unsubscribe(id).await {
            Ok(stats) => debug!(plugin_id = %id, stats = ?stats, "route removed"),
            Err(RouterError::NotSubscribed(_)) => {},
            Err(e) => warn!(plugin_id = %id, error = %e, "failed to remove route"),
        }
    }

    async fn deactivate(&self, instance: &mut PluginInstance, graceful: bool) {
        self.unsubscribe(&instance.id).await;
        if let Some(sandbox) = instance.sandbox.take() {
            if graceful && let Err(e) = sandbox.invoke_lifecycle(HookKind::OnUnload).await {
                warn!(plugin_id = %instance.id, error = %e, "onUnload failed");
                instance.record_failure(e.fault());
            }
            let outcome = sandbox.terminate().await;
            debug!(plugin_id = %instance.id, outcome = ?outcome, "sandbox released");
        }
        instance.state = PluginState::Stopped;
        info!(plugin_id = %instance.id, "plugin stopped");
    }

    async fn restart(&self, instance: &mut PluginInstance) -> HostResult<()> {
        self.unsubscribe(&instance.id).await;
        if let Some(old) = instance.sandbox.take() {
            old.terminate().await;
        }
        instance.restarts = instance.restarts.saturating_add(1);

        let sandbox = match self
            .spawn_sandbox(&instance.manifest, &instance.plugin_dir, &instance.filter)
            .await
        {
            Ok(sandbox) => sandbox,
            Err(e) => {
                instance.record_failure(e.fault());
                return Err(HostError::sandbox(&instance.id, e));
            },
        };
        instance.sandbox = Some(sandbox);
        info!(plugin_id = %instance.id, restarts = instance.restarts, "restarting plugin");
        self.activate(instance).await
    }

    async fn quarantine(&self, instance: &mut PluginInstance) {
        warn!(
            plugin_id = %instance.id,
            failures = instance.failures,
            restarts = instance.restarts,
            "quarantining plugin"
        );
        self.deactivate(instance, false).await;
        instance.quarantined = true;
    }

    async fn unload(&self, id: &PluginId) -> HostResult<()> {
        let instance = self.instance(id)?;
        {
            let mut instance = instance.lock().await;
            match instance.state {
                PluginState::Running | PluginState::Degraded => {
                    self.deactivate(&mut instance, true).await;
                },
                _ => {
                    if let Some(sandbox) = instance.sandbox.take() {
                        sandbox.terminate().await;
                    }
                },
            }
            instance.state = PluginState::Unloaded;
        }
        self.plugins.remove(id);
        info!(plugin_id = %id, "plugin unloaded");
        Ok(())
    }

    async fn sweep(&self) -> Vec<SweepAction> {
        let mut actions = Vec::new();
        for id in self.plugin_ids() {
            let Ok(instance) = self.instance(&id) else {
                continue;
            };
            let mut instance = instance.lock().await;
            let active = matches!(instance.state, PluginState::Running | PluginState::Degraded);
            if !active {
                continue;
            }

            if instance.failures >= self.config.quarantine_threshold {
                // Quarantine is only entered from Degraded.
                if instance.degrade() {
                    warn!(
                        plugin_id = %id,
                        failures = instance.failures,
                        "plugin degraded at failure threshold"
                    );
                    actions.push(SweepAction::Degraded(id.clone()));
                }
                self.quarantine(&mut instance).await;
                actions.push(SweepAction::Quarantined(id));
            } else if instance.state == PluginState::Degraded {
                if instance.restarts >= self.config.max_restarts {
                    self.quarantine(&mut instance).await;
                    actions.push(SweepAction::Quarantined(id));
                } else if let Err(e) = self.restart(&mut instance).await {
                    warn!(plugin_id = %id, error = %e, "restart failed");
                    actions.push(SweepAction::RestartFailed(id));
                } else {
                    actions.push(SweepAction::Restarted(id));
                }
            }
        }
        actions
    }

    async fn health(&self) -> HealthReport {
        let publisher = self.publisher.health().await;
        let monitor = self.monitor.as_ref().map(|rx| rx.borrow().clone());

        let mut plugins = Vec::new();
        for id in self.plugin_ids() {
            let Ok(instance) = self.instance(&id) else {
                continue;
            };
            let instance = instance.lock().await;
            plugins.push(PluginHealth {
                id: instance.id.clone(),
                version: instance.manifest.version.to_string(),
                state: instance.state,
                quarantined: instance.quarantined,
                failures: instance.failures,
                restarts: instance.restarts,
                last_error: instance.last_error.clone(),
                route: self.router.stats(&instance.id),
                sandbox: instance.sandbox.as_ref().map(|s| s.stats()),
                loaded_at: instance.loaded_at,
            });
        }
        HealthReport::new(publisher, monitor, self.router.len(), plugins)
    }

    async fn handle_notice(&self, notice: RouterNotice) {
        let Ok(instance) = self.instance(notice.plugin_id()) else {
            debug!(plugin_id = %notice.plugin_id(), "notice for unloaded plugin");
            return;
        };
        let mut instance = instance.lock().await;
        match notice {
            RouterNotice::DeliveryFailed { fault, .. } => instance.record_failure(fault),
            RouterNotice::Degraded { offset, fault, .. } => {
                if instance.degrade() {
                    warn!(plugin_id = %instance.id, offset, fault = %fault, "plugin degraded");
                }
                instance.last_error = Some(fault);
            },
        }
    }
}

async fn notice_loop(
    inner: Arc<HostInner>,
    mut notices: mpsc::UnboundedReceiver<RouterNotice>,
    cancel: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            notice = notices.recv() => notice,
        };
        match notice {
            Some(notice) => inner.handle_notice(notice).await,
            None => break,
        }
    }
    debug!("router notice loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotbridge_plugin::SandboxConfig;
    use hotbridge_router::RouterConfig;
    use hotbridge_core::RetryConfig;
    use hotbridge_test::{
        RecordingHooks, SCANNER_PRODUCT, SCANNER_VENDOR, attach, manifest_json, scanner_manifest,
        setup_test_logging, validated, write_plugin,
    };
    use std::time::Duration;

    fn test_config() -> HostConfig {
        HostConfig {
            router: RouterConfig {
                batch_size: 16,
                retry: RetryConfig::new(2, Duration::from_millis(5), Duration::from_millis(20)),
            },
            sandbox: SandboxConfig {
                memory_max_bytes: 64 * 1024 * 1024,
                hook_timeout: Duration::from_millis(200),
                grace_period: Duration::from_millis(100),
            },
            health_interval: Duration::from_secs(3600),
            ..HostConfig::default()
        }
    }

    async fn start_host(config: HostConfig, name: &str, hooks: Arc<RecordingHooks>) -> PluginHost {
        setup_test_logging();
        let runtimes = StandardRuntimes::new().with_builtin(name, hooks);
        PluginHost::builder()
            .config(config)
            .runtimes(Arc::new(runtimes))
            .start()
            .await
            .unwrap()
    }

    async fn wait_for_state(host: &PluginHost, id: &PluginId, state: PluginState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while host.plugin_state(id).await != state {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("plugin {id} never reached {state}"));
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let hooks = RecordingHooks::new();
        let host = start_host(test_config(), "usb-scanner-plugin", hooks.clone()).await;
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(root.path(), &scanner_manifest());

        let id = host.load_plugin(&dir).await.unwrap();
        assert_eq!(id.as_str(), "usb-scanner-plugin");
        assert_eq!(host.plugin_state(&id).await, PluginState::Loaded);
        assert!(!host.router().is_subscribed(&id));

        host.start_plugin(&id).await.unwrap();
        assert_eq!(host.plugin_state(&id).await, PluginState::Running);
        assert_eq!(hooks.count(HookKind::OnLoad), 1);
        assert!(host.router().is_subscribed(&id));

        host.publisher()
            .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
            .await
            .unwrap();
        wait_until(|| hooks.count(HookKind::OnUsbAttach) == 1).await;

        host.stop_plugin(&id).await.unwrap();
        assert_eq!(host.plugin_state(&id).await, PluginState::Stopped);
        assert_eq!(hooks.count(HookKind::OnUnload), 1);
        assert!(!host.router().is_subscribed(&id));

        host.unload_plugin(&id).await.unwrap();
        assert_eq!(host.plugin_state(&id).await, PluginState::Unloaded);
        assert!(host.plugin_ids().is_empty());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn failed_load_leaves_no_registration() {
        let hooks = RecordingHooks::new();
        let host = start_host(test_config(), "usb-scanner-plugin", hooks).await;
        let root = tempfile::tempdir().unwrap();

        let mut manifest = scanner_manifest();
        manifest.as_object_mut().unwrap().remove("permissions");
        let dir = write_plugin(root.path(), &manifest);
        let err = host.load_plugin(&dir).await.unwrap_err();
        let errors = err.validation_errors().expect("structured validation errors");
        assert!(errors.has_path("permissions"));
        assert!(host.plugin_ids().is_empty());

        // Valid manifest, but no runtime for its entry.
        let orphan = manifest_json("orphan-plugin", &["0x04A9"], &[]);
        let err = host
            .load_validated(validated(&orphan), root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Sandbox { .. }));
        assert!(host.plugin_ids().is_empty());
        assert!(host.router().is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let hooks = RecordingHooks::new();
        let host = start_host(test_config(), "usb-scanner-plugin", hooks).await;
        let root = tempfile::tempdir().unwrap();
        host.load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();
        let err = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::AlreadyLoaded(_)));
        assert_eq!(host.plugin_ids().len(), 1);
    }

    #[tokio::test]
    async fn failed_on_load_keeps_plugin_loaded() {
        let hooks = RecordingHooks::failing_on_load();
        let host = start_host(test_config(), "usb-scanner-plugin", hooks).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();

        let err = host.start_plugin(&id).await.unwrap_err();
        assert!(matches!(err, HostError::Sandbox { .. }));
        assert_eq!(host.plugin_state(&id).await, PluginState::Loaded);
        assert!(!host.router().is_subscribed(&id));
        let health = host.health().await;
        assert_eq!(health.plugin(&id).unwrap().failures, 1);
    }

    #[tokio::test]
    async fn transitions_are_checked() {
        let hooks = RecordingHooks::new();
        let host = start_host(test_config(), "usb-scanner-plugin", hooks).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();

        assert!(matches!(
            host.stop_plugin(&id).await,
            Err(HostError::InvalidTransition { state: PluginState::Loaded, .. })
        ));
        assert!(matches!(
            host.restart_plugin(&id).await,
            Err(HostError::InvalidTransition { .. })
        ));
        host.start_plugin(&id).await.unwrap();
        host.stop_plugin(&id).await.unwrap();
        assert!(matches!(
            host.start_plugin(&id).await,
            Err(HostError::InvalidTransition { state: PluginState::Stopped, .. })
        ));
        assert!(matches!(
            host.start_plugin(&PluginId::from_static("ghost")).await,
            Err(HostError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn degraded_plugin_is_restarted_and_event_redelivered() {
        // Three failures exhaust one attempt plus two retries.
        let hooks = RecordingHooks::failing(3);
        let host = start_host(test_config(), "usb-scanner-plugin", hooks.clone()).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();
        host.start_plugin(&id).await.unwrap();

        host.publisher()
            .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
            .await
            .unwrap();
        wait_for_state(&host, &id, PluginState::Degraded).await;

        let report = host.health().await;
        assert!(!report.healthy);
        let plugin = report.plugin(&id).unwrap();
        assert_eq!(plugin.failures, 3);
        assert!(plugin.last_error.is_some());

        assert_eq!(host.sweep().await, vec![SweepAction::Restarted(id.clone())]);
        assert_eq!(host.plugin_state(&id).await, PluginState::Running);
        wait_until(|| hooks.count(HookKind::OnUsbAttach) == 1).await;

        let report = host.health().await;
        assert!(report.healthy);
        assert_eq!(report.plugin(&id).unwrap().restarts, 1);
    }

    #[tokio::test]
    async fn repeated_failures_quarantine_the_plugin() {
        let config = HostConfig {
            quarantine_threshold: 3,
            ..test_config()
        };
        let hooks = RecordingHooks::failing(u32::MAX);
        let host = start_host(config, "usb-scanner-plugin", hooks.clone()).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();
        host.start_plugin(&id).await.unwrap();

        host.publisher()
            .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
            .await
            .unwrap();
        wait_for_state(&host, &id, PluginState::Degraded).await;

        assert_eq!(host.sweep().await, vec![SweepAction::Quarantined(id.clone())]);
        let report = host.health().await;
        let plugin = report.plugin(&id).unwrap();
        assert_eq!(plugin.state, PluginState::Stopped);
        assert!(plugin.quarantined);
        assert!(plugin.sandbox.is_none());
        assert!(!host.router().is_subscribed(&id));
        assert!(!report.healthy);
        // Quarantine skips onUnload.
        assert_eq!(hooks.count(HookKind::OnUnload), 0);
    }

    #[tokio::test]
    async fn restart_budget_exhaustion_quarantines() {
        let config = HostConfig {
            max_restarts: 0,
            ..test_config()
        };
        let hooks = RecordingHooks::failing(3);
        let host = start_host(config, "usb-scanner-plugin", hooks).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();
        host.start_plugin(&id).await.unwrap();
        host.publisher()
            .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
            .await
            .unwrap();
        wait_for_state(&host, &id, PluginState::Degraded).await;

        assert_eq!(host.sweep().await, vec![SweepAction::Quarantined(id.clone())]);
        assert_eq!(host.plugin_state(&id).await, PluginState::Stopped);
    }

    #[tokio::test]
    async fn running_plugin_at_threshold_degrades_before_quarantine() {
        let config = HostConfig {
            quarantine_threshold: 1,
            ..test_config()
        };
        // The retry succeeds, so the route never degrades on its own.
        let hooks = RecordingHooks::failing(1);
        let host = start_host(config, "usb-scanner-plugin", hooks).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();
        host.start_plugin(&id).await.unwrap();
        host.publisher()
            .publish(attach(SCANNER_VENDOR, SCANNER_PRODUCT))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let report = host.health().await;
                let plugin = report.plugin(&id).unwrap();
                if plugin.failures >= 1 && plugin.route.as_ref().is_some_and(|r| r.delivered == 1) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("retry never succeeded");
        assert_eq!(host.plugin_state(&id).await, PluginState::Running);

        assert_eq!(
            host.sweep().await,
            vec![
                SweepAction::Degraded(id.clone()),
                SweepAction::Quarantined(id.clone())
            ]
        );
        let report = host.health().await;
        let plugin = report.plugin(&id).unwrap();
        assert_eq!(plugin.state, PluginState::Stopped);
        assert!(plugin.quarantined);
    }

    #[tokio::test]
    async fn shutdown_stops_plugins_and_refuses_new_work() {
        let hooks = RecordingHooks::new();
        let host = start_host(test_config(), "usb-scanner-plugin", hooks.clone()).await;
        let root = tempfile::tempdir().unwrap();
        let id = host
            .load_validated(validated(&scanner_manifest()), root.path())
            .await
            .unwrap();
        host.start_plugin(&id).await.unwrap();

        host.shutdown().await;
        assert_eq!(hooks.count(HookKind::OnUnload), 1);
        assert!(host.plugin_ids().is_empty());
        assert!(host.router().is_empty());
        assert!(matches!(
            host.load_validated(validated(&scanner_manifest()), root.path())
                .await,
            Err(HostError::ShutDown)
        ));
        // Idempotent.
        host.shutdown().await;
    }
}
