//! The event bridge.
//!
//! Every subscribed plugin gets its own task and its own committed offset in
//! the event log (consumer name `plugin:<id>`):
//!
//! ```text
//!                  ┌─ route task (plugin a) ── cursor a ──→ sandbox a
//! event log ───────┼─ route task (plugin b) ── cursor b ──→ sandbox b
//!                  └─ route task (plugin c) ── cursor c ──→ sandbox c
//! ```
//!
//! A task advances its cursor only after the plugin acknowledged the entry
//! (or the entry did not match). A slow or failing plugin only holds back
//! its own cursor.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hotbridge_core::{Fault, LogEntry, Offset, RetryConfig};
use hotbridge_events::EventLog;
use hotbridge_plugin::PluginId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{RouterError, RouterResult};
use crate::stats::{RouteCounters, RouteStats};
use crate::target::Subscription;

/// Router tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Log entries read per poll.
    pub batch_size: usize,
    /// Delivery retries and their backoff. `max_attempts` retries follow the
    /// first attempt before the plugin is reported degraded.
    pub retry: RetryConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            retry: RetryConfig::new(3, Duration::from_millis(200), Duration::from_secs(5)),
        }
    }
}

/// Something the orchestrator should know about a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterNotice {
    /// One delivery attempt failed.
    DeliveryFailed {
        /// Affected plugin.
        plugin_id: PluginId,
        /// Log offset of the event.
        offset: Offset,
        /// 1-based attempt number.
        attempt: u32,
        /// Why it failed.
        fault: Fault,
    },
    /// Retries were exhausted. The route stopped with its cursor still at
    /// `offset`, so the event is redelivered when the plugin is restarted.
    Degraded {
        /// Affected plugin.
        plugin_id: PluginId,
        /// Log offset of the undelivered event.
        offset: Offset,
        /// Last failure.
        fault: Fault,
    },
}

impl RouterNotice {
    /// Plugin the notice is about.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        match self {
            Self::DeliveryFailed { plugin_id, .. } | Self::Degraded { plugin_id, .. } => plugin_id,
        }
    }
}

/// How a route task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteExit {
    Cancelled,
    Degraded,
    LogClosed,
}

struct Route {
    cancel: CancellationToken,
    task: JoinHandle<RouteExit>,
    counters: Arc<RouteCounters>,
}

/// Routes log entries to subscribed plugins.
pub struct Router {
    log: Arc<dyn EventLog>,
    config: RouterConfig,
    routes: DashMap<PluginId, Route>,
    notices: mpsc::UnboundedSender<RouterNotice>,
    shutdown: CancellationToken,
}

impl Router {
    /// Create a router over `log`. The receiver yields [`RouterNotice`]s.
    #[must_use]
    pub fn new(
        log: Arc<dyn EventLog>,
        config: RouterConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RouterNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let router = Self {
            log,
            config,
            routes: DashMap::new(),
            notices,
            shutdown: CancellationToken::new(),
        };
        (router, rx)
    }

    /// Start routing to `subscription`.
    ///
    /// The route resumes from the plugin's last committed offset. A plugin
    /// that never committed starts at the current head, and that position is
    /// committed right away so a restart resumes from it.
    ///
    /// # Errors
    ///
    /// Fails if the plugin already has a route, the router was shut down, or
    /// the log cannot be read.
    pub async fn subscribe(&self, subscription: Subscription) -> RouterResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(RouterError::ShutDown);
        }
        let plugin_id = subscription.plugin_id().clone();
        if self.routes.contains_key(&plugin_id) {
            return Err(RouterError::AlreadySubscribed(plugin_id));
        }

        let consumer = plugin_id.consumer_name();
        let cursor = match self.log.committed(&consumer).await? {
            Some(offset) => offset,
            None => {
                let head = self.log.head().await?;
                self.log.commit(&consumer, head).await?;
                head
            },
        };

        match self.routes.entry(plugin_id.clone()) {
            Entry::Occupied(_) => Err(RouterError::AlreadySubscribed(plugin_id)),
            Entry::Vacant(slot) => {
                let cancel = self.shutdown.child_token();
                let counters = Arc::new(RouteCounters::default());
                let task = tokio::spawn(run_route(RouteTask {
                    subscription,
                    log: Arc::clone(&self.log),
                    config: self.config,
                    counters: Arc::clone(&counters),
                    cancel: cancel.clone(),
                    notices: self.notices.clone(),
                    consumer,
                    cursor,
                }));
                slot.insert(Route {
                    cancel,
                    task,
                    counters,
                });
                info!(plugin_id = %plugin_id, cursor, "subscription installed");
                Ok(())
            },
        }
    }

    /// Stop routing to a plugin and release its task. Returns its final
    /// counters. An in-flight delivery is abandoned without committing.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotSubscribed`] if there is no route.
    pub async fn unsubscribe(&self, plugin_id: &PluginId) -> RouterResult<RouteStats> {
        let (_, route) = self
            .routes
            .remove(plugin_id)
            .ok_or_else(|| RouterError::NotSubscribed(plugin_id.clone()))?;
        route.cancel.cancel();
        match route.task.await {
            Ok(exit) => debug!(plugin_id = %plugin_id, exit = ?exit, "route task joined"),
            Err(e) => warn!(plugin_id = %plugin_id, error = %e, "route task ended abnormally"),
        }
        info!(plugin_id = %plugin_id, "subscription removed");
        Ok(route.counters.snapshot())
    }

    /// Whether the plugin has a route (running or stopped after degradation).
    #[must_use]
    pub fn is_subscribed(&self, plugin_id: &PluginId) -> bool {
        self.routes.contains_key(plugin_id)
    }

    /// Whether the plugin's route task is still delivering.
    #[must_use]
    pub fn is_active(&self, plugin_id: &PluginId) -> bool {
        self.routes
            .get(plugin_id)
            .is_some_and(|route| !route.task.is_finished())
    }

    /// Counters for one plugin.
    #[must_use]
    pub fn stats(&self, plugin_id: &PluginId) -> Option<RouteStats> {
        self.routes
            .get(plugin_id)
            .map(|route| route.counters.snapshot())
    }

    /// Number of installed routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Committed offset of a plugin's cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read.
    pub async fn cursor(&self, plugin_id: &PluginId) -> RouterResult<Option<Offset>> {
        Ok(self.log.committed(&plugin_id.consumer_name()).await?)
    }

    /// Stop every route. Further subscriptions are refused.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<PluginId> = self.routes.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            let _ = self.unsubscribe(&id).await;
        }
        info!("router shut down");
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

struct RouteTask {
    subscription: Subscription,
    log: Arc<dyn EventLog>,
    config: RouterConfig,
    counters: Arc<RouteCounters>,
    cancel: CancellationToken,
    notices: mpsc::UnboundedSender<RouterNotice>,
    consumer: String,
    cursor: Offset,
}

enum Delivery {
    Acknowledged,
    Failed(Fault),
    Cancelled,
}

async fn run_route(mut task: RouteTask) -> RouteExit {
    let plugin_id = task.subscription.plugin_id().clone();
    let mut head = task.log.subscribe();
    debug!(plugin_id = %plugin_id, cursor = task.cursor, "route started");

    loop {
        let batch = tokio::select! {
            biased;
            () = task.cancel.cancelled() => return RouteExit::Cancelled,
            batch = task.log.read_from(task.cursor, task.config.batch_size) => batch,
        };
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                warn!(plugin_id = %plugin_id, error = %e, "failed to read event log");
                if !pause(&task.cancel, task.config.retry.initial_delay).await {
                    return RouteExit::Cancelled;
                }
                continue;
            },
        };

        if batch.is_empty() {
            loop {
                let latest = *head.borrow_and_update();
                if latest > task.cursor {
                    break;
                }
                tokio::select! {
                    biased;
                    () = task.cancel.cancelled() => return RouteExit::Cancelled,
                    changed = head.changed() => {
                        if changed.is_err() {
                            return RouteExit::LogClosed;
                        }
                    },
                }
            }
            continue;
        }

        for entry in batch {
            task.counters.observed();
            if task.subscription.matches(&entry.event) {
                task.counters.matched();
                match deliver_with_retry(&task, &plugin_id, &entry).await {
                    Delivery::Acknowledged => task.counters.delivered(),
                    Delivery::Cancelled => return RouteExit::Cancelled,
                    Delivery::Failed(fault) => {
                        task.counters.failed();
                        warn!(
                            plugin_id = %plugin_id,
                            offset = entry.offset,
                            fault = %fault,
                            "delivery retries exhausted, plugin degraded"
                        );
                        let _ = task.notices.send(RouterNotice::Degraded {
                            plugin_id: plugin_id.clone(),
                            offset: entry.offset,
                            fault,
                        });
                        return RouteExit::Degraded;
                    },
                }
            } else {
                trace!(plugin_id = %plugin_id, offset = entry.offset, "event outside filter");
            }

            task.cursor = entry.offset.saturating_add(1);
            if let Err(e) = task.log.commit(&task.consumer, task.cursor).await {
                warn!(plugin_id = %plugin_id, offset = entry.offset, error = %e, "failed to commit cursor");
            }
        }
    }
}

async fn deliver_with_retry(task: &RouteTask, plugin_id: &PluginId, entry: &LogEntry) -> Delivery {
    let retry = task.config.retry;
    let mut retries: u32 = 0;
    loop {
        let attempt = tokio::select! {
            biased;
            () = task.cancel.cancelled() => return Delivery::Cancelled,
            result = task.subscription.target().deliver(&entry.event) => result,
        };
        let fault = match attempt {
            Ok(()) => {
                trace!(plugin_id = %plugin_id, offset = entry.offset, "event acknowledged");
                return Delivery::Acknowledged;
            },
            Err(fault) => fault,
        };

        debug!(
            plugin_id = %plugin_id,
            offset = entry.offset,
            attempt = retries.saturating_add(1),
            fault = %fault,
            "delivery attempt failed"
        );
        let _ = task.notices.send(RouterNotice::DeliveryFailed {
            plugin_id: plugin_id.clone(),
            offset: entry.offset,
            attempt: retries.saturating_add(1),
            fault: fault.clone(),
        });

        if !retry.should_retry(retries) {
            return Delivery::Failed(fault);
        }
        retries = retries.saturating_add(1);
        task.counters.retried();
        if !pause(&task.cancel, retry.delay_for_attempt(retries)).await {
            return Delivery::Cancelled;
        }
    }
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
