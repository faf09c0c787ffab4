//! Event publisher.
//!
//! Turns device descriptors into [`HotplugEvent`]s with per-bus sequence
//! numbers and appends them to the [`EventLog`]. While the log is
//! unreachable, events queue in a bounded buffer and a background task
//! retries with exponential backoff. Overflow drops the oldest buffered
//! event and records a [`FaultKind::BufferOverflow`] fault.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hotbridge_core::{DeviceDescriptor, Fault, FaultKind, HotplugEvent, Offset, RetryConfig};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{LogError, PublishError, PublishResult};
use crate::log::EventLog;

/// Publisher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Events held locally while the log is unreachable.
    pub buffer_capacity: usize,
    /// Backoff between flush attempts.
    pub backoff: RetryConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            backoff: RetryConfig::unbounded(
                std::time::Duration::from_millis(100),
                std::time::Duration::from_secs(10),
            ),
        }
    }
}

/// What happened to a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored in the log at this offset.
    Appended {
        /// Log offset.
        offset: Offset,
        /// Assigned per-bus sequence number.
        sequence: u64,
    },
    /// Held in the local buffer until the log is reachable again.
    Buffered {
        /// Assigned per-bus sequence number.
        sequence: u64,
    },
}

impl PublishOutcome {
    /// The sequence number assigned to the event.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Appended { sequence, .. } | Self::Buffered { sequence } => *sequence,
        }
    }
}

/// Publisher health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherHealth {
    /// `true` while the last append succeeded and nothing is buffered.
    pub healthy: bool,
    /// Most recent fault, cleared only by a later fault.
    pub last_error: Option<Fault>,
    /// Events waiting in the local buffer.
    pub buffered: usize,
    /// Events dropped because the buffer overflowed.
    pub dropped: u64,
    /// Events appended to the log.
    pub appended: u64,
}

#[derive(Debug, Default)]
struct PublisherState {
    sequences: HashMap<u16, u64>,
    buffer: VecDeque<HotplugEvent>,
    healthy: bool,
    last_error: Option<Fault>,
    dropped: u64,
    appended: u64,
}

impl PublisherState {
    fn next_sequence(&mut self, bus: u16) -> u64 {
        let slot = self.sequences.entry(bus).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    fn mark_appended(&mut self) {
        self.appended = self.appended.saturating_add(1);
        if self.buffer.is_empty() {
            self.healthy = true;
        }
    }

    fn mark_unavailable(&mut self, error: &LogError) {
        if self.healthy {
            warn!(error = %error, "event log unreachable, buffering");
        }
        self.healthy = false;
        self.last_error = Some(Fault::new(FaultKind::PublisherUnavailable, error.to_string()));
    }
}

/// Appends device changes to the event log with per-bus ordering.
#[derive(Debug)]
pub struct EventPublisher {
    log: Arc<dyn EventLog>,
    config: PublisherConfig,
    state: Mutex<PublisherState>,
    wake: Notify,
    closed: AtomicBool,
}

impl EventPublisher {
    /// Create a publisher whose sequence counters continue from what the
    /// log already holds.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Init`] if the log cannot report its sequences.
    pub async fn new(log: Arc<dyn EventLog>, config: PublisherConfig) -> PublishResult<Self> {
        let sequences = log.last_sequences().await.map_err(PublishError::Init)?;
        debug!(buses = sequences.len(), "publisher sequence counters restored");
        Ok(Self {
            log,
            config,
            state: Mutex::new(PublisherState {
                sequences,
                healthy: true,
                ..PublisherState::default()
            }),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The log this publisher appends to.
    #[must_use]
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Publish one device change.
    ///
    /// Events for the same bus reach the log in the order they were
    /// published: once anything is buffered, later events queue behind it.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Closed`] after [`close`](Self::close).
    pub async fn publish(&self, descriptor: DeviceDescriptor) -> PublishResult<PublishOutcome> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        let mut state = self.state.lock().await;
        let bus = descriptor.bus_location().bus();
        let sequence = state.next_sequence(bus);
        let event = HotplugEvent::new(sequence, descriptor);
        let event_id = event.event_id();

        if state.buffer.is_empty() {
            match self.log.append(event.clone()).await {
                Ok(offset) => {
                    state.mark_appended();
                    debug!(%event_id, bus, sequence, offset, "published event");
                    return Ok(PublishOutcome::Appended { offset, sequence });
                },
                Err(e) => state.mark_unavailable(&e),
            }
        }

        self.buffer_event(&mut state, event);
        drop(state);
        self.wake.notify_one();
        Ok(PublishOutcome::Buffered { sequence })
    }

    fn buffer_event(&self, state: &mut PublisherState, event: HotplugEvent) {
        if state.buffer.len() >= self.config.buffer_capacity {
            if let Some(oldest) = state.buffer.pop_front() {
                state.dropped = state.dropped.saturating_add(1);
                let message = format!(
                    "dropped event {} (bus {}, sequence {})",
                    oldest.event_id(),
                    oldest.bus(),
                    oldest.sequence()
                );
                warn!(dropped = state.dropped, "{message}");
                state.last_error = Some(Fault::new(FaultKind::BufferOverflow, message));
            }
        }
        state.buffer.push_back(event);
    }

    /// Try to append everything buffered, oldest first.
    ///
    /// Returns `true` once the buffer is empty.
    pub async fn flush(&self) -> bool {
        let mut state = self.state.lock().await;
        while let Some(front) = state.buffer.front().cloned() {
            match self.log.append(front).await {
                Ok(offset) => {
                    state.buffer.pop_front();
                    state.mark_appended();
                    debug!(offset, remaining = state.buffer.len(), "flushed buffered event");
                },
                Err(e) => {
                    state.mark_unavailable(&e);
                    return false;
                },
            }
        }
        if !state.healthy {
            info!("event log reachable again, buffer drained");
        }
        state.healthy = true;
        true
    }

    /// Spawn the background task that drains the buffer with backoff.
    pub fn spawn_retry_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = publisher.wake.notified() => {},
                }

                let mut attempt: u32 = 0;
                while !publisher.flush().await {
                    attempt = attempt.saturating_add(1);
                    let delay = publisher.config.backoff.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis(), "publisher retry scheduled");
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {},
                    }
                }
            }
            debug!("publisher retry loop stopped");
        })
    }

    /// Stop accepting events. Buffered events stay until flushed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Health snapshot.
    pub async fn health(&self) -> PublisherHealth {
        let state = self.state.lock().await;
        PublisherHealth {
            healthy: state.healthy && state.buffer.is_empty(),
            last_error: state.last_error.clone(),
            buffered: state.buffer.len(),
            dropped: state.dropped,
            appended: state.appended,
        }
    }
}
