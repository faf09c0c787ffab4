//! In-memory event log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hotbridge_core::{HotplugEvent, LogEntry, Offset};
use tokio::sync::{RwLock, watch};
use tracing::trace;

use crate::error::{LogError, LogResult};
use crate::log::{EventLog, LogState};

/// Event log kept entirely in memory.
///
/// Used for tests and for hosts configured with the `memory` backend.
/// [`set_available`](Self::set_available) simulates an unreachable log.
#[derive(Debug)]
pub struct MemoryEventLog {
    state: RwLock<LogState>,
    head_tx: watch::Sender<Offset>,
    available: AtomicBool,
}

impl MemoryEventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        let (head_tx, _) = watch::channel(0);
        Self {
            state: RwLock::new(LogState::default()),
            head_tx,
            available: AtomicBool::new(true),
        }
    }

    /// Make appends fail with [`LogError::Unavailable`] until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether the log holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: HotplugEvent) -> LogResult<Offset> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("memory log disabled".to_string()));
        }
        let mut state = self.state.write().await;
        let entry = state.push(event);
        let head = state.head();
        drop(state);

        trace!(offset = entry.offset, "appended to memory log");
        self.head_tx.send_replace(head);
        Ok(entry.offset)
    }

    async fn read_from(&self, offset: Offset, max: usize) -> LogResult<Vec<LogEntry>> {
        Ok(self.state.read().await.read_from(offset, max))
    }

    async fn commit(&self, consumer: &str, offset: Offset) -> LogResult<()> {
        self.state.write().await.commit(consumer, offset);
        Ok(())
    }

    async fn committed(&self, consumer: &str) -> LogResult<Option<Offset>> {
        Ok(self.state.read().await.offsets.get(consumer).copied())
    }

    async fn head(&self) -> LogResult<Offset> {
        Ok(self.state.read().await.head())
    }

    async fn last_sequences(&self) -> LogResult<HashMap<u16, u64>> {
        Ok(self.state.read().await.sequences.clone())
    }

    fn subscribe(&self) -> watch::Receiver<Offset> {
        self.head_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotbridge_core::{BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, ProductId, VendorId};

    fn event(seq: u64) -> HotplugEvent {
        HotplugEvent::new(
            seq,
            DeviceDescriptor::new(
                DeviceAction::Attach,
                VendorId::new(0x04A9),
                ProductId::new(0x220E),
                DeviceClass::IMAGE,
                BusLocation::parse("1-1").unwrap(),
            ),
        )
    }

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let log = MemoryEventLog::new();
        for seq in 1..=3 {
            log.append(event(seq)).await.unwrap();
        }
        let entries = log.read_from(1, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset, 1);
        assert_eq!(entries[0].event.sequence(), 2);
        assert_eq!(log.head().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn consumers_have_independent_offsets() {
        let log = MemoryEventLog::new();
        log.commit("a", 2).await.unwrap();
        assert_eq!(log.committed("a").await.unwrap(), Some(2));
        assert_eq!(log.committed("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_log_rejects_appends() {
        let log = MemoryEventLog::new();
        log.set_available(false);
        assert!(matches!(
            log.append(event(1)).await,
            Err(LogError::Unavailable(_))
        ));
        log.set_available(true);
        assert_eq!(log.append(event(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_head_changes() {
        let log = MemoryEventLog::new();
        let mut rx = log.subscribe();
        log.append(event(1)).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
