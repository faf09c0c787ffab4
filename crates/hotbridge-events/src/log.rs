//! The event log abstraction.
//!
//! The log is the only resource shared between the publisher and the router.
//! It is append-only and ordered; each consumer keeps its own committed
//! offset so that a slow or failed consumer never affects another.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use hotbridge_core::{HotplugEvent, LogEntry, Offset};
use tokio::sync::watch;

use crate::error::LogResult;

/// Durable, ordered event log with independent consumer offsets.
///
/// Committed offsets name the *next* entry a consumer should read: after
/// acknowledging the entry at offset `n`, a consumer commits `n + 1`.
#[async_trait]
pub trait EventLog: Send + Sync + fmt::Debug {
    /// Append an event and return the offset it was stored at.
    async fn append(&self, event: HotplugEvent) -> LogResult<Offset>;

    /// Read up to `max` entries starting at `offset`.
    ///
    /// Returns an empty vector when `offset` is at or past the head.
    async fn read_from(&self, offset: Offset, max: usize) -> LogResult<Vec<LogEntry>>;

    /// Record that `consumer` has processed everything before `offset`.
    ///
    /// Commits never move a consumer backwards; a lower offset is ignored.
    async fn commit(&self, consumer: &str, offset: Offset) -> LogResult<()>;

    /// The last committed offset for `consumer`, if it ever committed.
    async fn committed(&self, consumer: &str) -> LogResult<Option<Offset>>;

    /// Offset the next appended entry will receive.
    async fn head(&self) -> LogResult<Offset>;

    /// Highest sequence number stored per bus.
    async fn last_sequences(&self) -> LogResult<HashMap<u16, u64>>;

    /// Watch the head offset. The value changes after every append.
    fn subscribe(&self) -> watch::Receiver<Offset>;
}

/// Bookkeeping shared by the backends: entries, offsets and sequence maxima.
#[derive(Debug, Default)]
pub(crate) struct LogState {
    pub(crate) entries: Vec<LogEntry>,
    pub(crate) offsets: HashMap<String, Offset>,
    pub(crate) sequences: HashMap<u16, u64>,
}

impl LogState {
    pub(crate) fn head(&self) -> Offset {
        self.entries.len() as Offset
    }

    /// Store `event` at the current head.
    pub(crate) fn push(&mut self, event: HotplugEvent) -> LogEntry {
        let offset = self.head();
        self.track_sequence(&event);
        let entry = LogEntry { offset, event };
        self.entries.push(entry.clone());
        entry
    }

    pub(crate) fn track_sequence(&mut self, event: &HotplugEvent) {
        let last = self.sequences.entry(event.bus()).or_insert(0);
        *last = (*last).max(event.sequence());
    }

    pub(crate) fn read_from(&self, offset: Offset, max: usize) -> Vec<LogEntry> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    /// Returns `true` if the stored offset moved forward.
    pub(crate) fn commit(&mut self, consumer: &str, offset: Offset) -> bool {
        match self.offsets.get_mut(consumer) {
            Some(slot) if offset <= *slot => false,
            Some(slot) => {
                *slot = offset;
                true
            },
            None => {
                self.offsets.insert(consumer.to_string(), offset);
                true
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotbridge_core::{BusLocation, DeviceAction, DeviceClass, DeviceDescriptor, ProductId, VendorId};

    fn event(bus: u16, seq: u64) -> HotplugEvent {
        let descriptor = DeviceDescriptor::new(
            DeviceAction::Attach,
            VendorId::new(1),
            ProductId::new(2),
            DeviceClass(0),
            BusLocation::new(bus, "1").unwrap(),
        );
        HotplugEvent::new(seq, descriptor)
    }

    #[test]
    fn push_assigns_offsets_and_tracks_sequences() {
        let mut state = LogState::default();
        assert_eq!(state.push(event(1, 1)).offset, 0);
        assert_eq!(state.push(event(2, 1)).offset, 1);
        assert_eq!(state.push(event(1, 2)).offset, 2);
        assert_eq!(state.head(), 3);
        assert_eq!(state.sequences[&1], 2);
        assert_eq!(state.sequences[&2], 1);
    }

    #[test]
    fn commit_never_moves_backwards() {
        let mut state = LogState::default();
        assert!(state.commit("a", 5));
        assert!(!state.commit("a", 3));
        assert_eq!(state.offsets["a"], 5);
    }

    #[test]
    fn read_past_head_is_empty() {
        let mut state = LogState::default();
        state.push(event(1, 1));
        assert!(state.read_from(1, 10).is_empty());
        assert_eq!(state.read_from(0, 10).len(), 1);
    }
}
