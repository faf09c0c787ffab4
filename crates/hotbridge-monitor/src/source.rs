//! Hotplug sources.
//!
//! A source turns some platform mechanism into a stream of normalized
//! [`DeviceDescriptor`]s. The monitor owns exactly one source.

use async_trait::async_trait;
use hotbridge_core::DeviceDescriptor;
use tokio::sync::mpsc;

use crate::error::{MonitorError, MonitorResult};

/// A stream of device attach/detach notifications.
///
/// `next` must be cancel-safe: the monitor polls it inside `tokio::select!`
/// and may drop the future when another branch completes.
#[async_trait]
pub trait HotplugSource: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Acquire platform resources. Errors here are fatal to the monitor.
    async fn open(&mut self) -> MonitorResult<()>;

    /// Wait for the next notification. `Ok(None)` means the source ended.
    async fn next(&mut self) -> MonitorResult<Option<DeviceDescriptor>>;
}

/// Items injected into a [`ChannelSource`].
#[derive(Debug)]
enum Injected {
    Device(DeviceDescriptor),
    TransientError(String),
}

/// Sender half of a [`ChannelSource`].
#[derive(Debug, Clone)]
pub struct ChannelSourceHandle {
    tx: mpsc::Sender<Injected>,
}

impl ChannelSourceHandle {
    /// Inject a device notification. Returns `false` if the source is gone.
    pub async fn notify(&self, descriptor: DeviceDescriptor) -> bool {
        self.tx.send(Injected::Device(descriptor)).await.is_ok()
    }

    /// Inject a transient read error.
    pub async fn fail(&self, message: impl Into<String>) -> bool {
        self.tx
            .send(Injected::TransientError(message.into()))
            .await
            .is_ok()
    }
}

/// Source fed through a channel: used by embedders that already receive
/// hotplug notifications elsewhere, and by tests.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Injected>,
    open_error: Option<MonitorError>,
}

impl ChannelSource {
    /// Create a source and the handle used to feed it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ChannelSourceHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                rx,
                open_error: None,
            },
            ChannelSourceHandle { tx },
        )
    }

    /// Make [`open`](HotplugSource::open) fail with `error`.
    #[must_use]
    pub fn with_open_error(mut self, error: MonitorError) -> Self {
        self.open_error = Some(error);
        self
    }
}

#[async_trait]
impl HotplugSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn open(&mut self) -> MonitorResult<()> {
        match self.open_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn next(&mut self) -> MonitorResult<Option<DeviceDescriptor>> {
        match self.rx.recv().await {
            Some(Injected::Device(d)) => Ok(Some(d)),
            Some(Injected::TransientError(msg)) => Err(MonitorError::Transient(msg)),
            None => Ok(None),
        }
    }
}
