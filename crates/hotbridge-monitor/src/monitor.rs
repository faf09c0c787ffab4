//! The device monitor task.
//!
//! ```text
//! HotplugSource::next ─→ Debouncer ─(window closed)─→ EventPublisher::publish
//! ```
//!
//! The monitor never touches the router or plugins. A fatal source error
//! stops only the monitor; the failure is visible through its status.

use std::sync::Arc;
use std::time::Duration;

use hotbridge_core::{DeviceDescriptor, Fault, FaultKind, RetryConfig};
use hotbridge_events::{EventPublisher, PublishError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::debounce::Debouncer;
use crate::error::{MonitorError, MonitorResult};
use crate::source::HotplugSource;

/// Monitor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Coalescing window per device.
    pub debounce: Duration,
    /// Backoff for transient source errors.
    pub retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            retry: RetryConfig::new(8, Duration::from_millis(100), Duration::from_secs(5)),
        }
    }
}

/// Lifecycle state of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Created, source not yet opened.
    Starting,
    /// Watching for changes.
    Running,
    /// Stopped by a fatal error.
    Failed,
    /// Stopped on request or because the source ended.
    Stopped,
}

/// Monitor status snapshot published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    /// Current state.
    pub state: MonitorState,
    /// Raw notifications received from the source.
    pub notifications: u64,
    /// Notifications absorbed by debouncing.
    pub coalesced: u64,
    /// Descriptors handed to the publisher.
    pub published: u64,
    /// Last fault, if any.
    pub last_error: Option<Fault>,
}

impl MonitorStatus {
    fn starting() -> Self {
        Self {
            state: MonitorState::Starting,
            notifications: 0,
            coalesced: 0,
            published: 0,
            last_error: None,
        }
    }
}

/// Watches a [`HotplugSource`] and publishes debounced descriptors.
pub struct DeviceMonitor {
    source: Box<dyn HotplugSource>,
    publisher: Arc<EventPublisher>,
    config: MonitorConfig,
    debouncer: Debouncer,
    status_tx: watch::Sender<MonitorStatus>,
}

impl DeviceMonitor {
    /// Create a monitor. Nothing happens until [`run`](Self::run).
    #[must_use]
    pub fn new(
        source: Box<dyn HotplugSource>,
        publisher: Arc<EventPublisher>,
        config: MonitorConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(MonitorStatus::starting());
        Self {
            source,
            publisher,
            debouncer: Debouncer::new(config.debounce),
            config,
            status_tx,
        }
    }

    /// Subscribe to status updates.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    /// Run until cancelled, the source ends, or a fatal error occurs.
    ///
    /// Pending debounced notifications are published before returning
    /// normally.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the monitor: a permission or
    /// availability failure when opening the source, transient errors
    /// persisting past the retry limit, or a closed publisher.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorResult<()> {
        let source_name = self.source.name().to_string();
        if let Err(e) = self.source.open().await {
            error!(source = %source_name, error = %e, "device monitor failed to start");
            self.fail(&e);
            return Err(e);
        }
        info!(source = %source_name, debounce_ms = self.config.debounce.as_millis(), "device monitor running");
        self.status_tx
            .send_modify(|s| s.state = MonitorState::Running);

        let result = self.event_loop(&cancel).await;
        match &result {
            Ok(()) => {
                self.flush_pending().await?;
                self.status_tx
                    .send_modify(|s| s.state = MonitorState::Stopped);
                info!(source = %source_name, "device monitor stopped");
            },
            Err(e) => {
                error!(source = %source_name, error = %e, "device monitor failed");
                self.fail(e);
            },
        }
        result
    }

    async fn event_loop(&mut self, cancel: &CancellationToken) -> MonitorResult<()> {
        let mut consecutive_errors: u32 = 0;
        loop {
            let next_deadline = self.debouncer.next_deadline();

            tokio::select! {
                biased;

                () = cancel.cancelled() => return Ok(()),

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let ready = self.debouncer.drain_ready(Instant::now());
                    self.publish_all(ready).await?;
                }

                item = self.source.next() => match item {
                    Ok(Some(descriptor)) => {
                        consecutive_errors = 0;
                        debug!(
                            device = %descriptor.key(),
                            action = %descriptor.action(),
                            "device notification"
                        );
                        self.debouncer.push(descriptor, Instant::now());
                        let coalesced = self.debouncer.coalesced();
                        self.status_tx.send_modify(|s| {
                            s.notifications = s.notifications.saturating_add(1);
                            s.coalesced = coalesced;
                        });
                    },
                    Ok(None) => {
                        debug!("hotplug source ended");
                        return Ok(());
                    },
                    Err(e) if e.is_transient() => {
                        if !self.config.retry.should_retry(consecutive_errors) {
                            return Err(MonitorError::RetriesExhausted {
                                attempts: consecutive_errors,
                                last: e.to_string(),
                            });
                        }
                        consecutive_errors = consecutive_errors.saturating_add(1);
                        let delay = self.config.retry.delay_for_attempt(consecutive_errors);
                        warn!(
                            error = %e,
                            attempt = consecutive_errors,
                            delay_ms = delay.as_millis(),
                            "transient hotplug read error, retrying"
                        );
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => return Ok(()),
                            () = tokio::time::sleep(delay) => {},
                        }
                    },
                    Err(e) => return Err(e),
                },
            }
        }
    }

    async fn flush_pending(&mut self) -> MonitorResult<()> {
        let pending = self.debouncer.drain_all();
        self.publish_all(pending).await
    }

    async fn publish_all(&mut self, descriptors: Vec<DeviceDescriptor>) -> MonitorResult<()> {
        for descriptor in descriptors {
            match self.publisher.publish(descriptor).await {
                Ok(outcome) => {
                    debug!(sequence = outcome.sequence(), "descriptor handed to publisher");
                    self.status_tx
                        .send_modify(|s| s.published = s.published.saturating_add(1));
                },
                Err(PublishError::Closed | PublishError::Init(_)) => {
                    return Err(MonitorError::PublisherClosed);
                },
            }
        }
        Ok(())
    }

    fn fail(&self, error: &MonitorError) {
        let fault = Fault::new(FaultKind::DeviceMonitorFault, error.to_string());
        self.status_tx.send_modify(|s| {
            s.state = MonitorState::Failed;
            s.last_error = Some(fault);
        });
    }
}
