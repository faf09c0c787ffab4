//! Per-device notification coalescing.
//!
//! Trailing-edge debounce keyed by [`DeviceKey`]: every notification for a
//! device pushes its deadline to `now + window` and replaces the held
//! descriptor, so a burst collapses into its final state.
//!
//! The deadline never moves past `first_seen + max_wait`, so a device that
//! keeps flapping is still reported at least once per `max_wait`.

use std::collections::HashMap;
use std::time::Duration;

use hotbridge_core::{DeviceDescriptor, DeviceKey};
use tokio::time::Instant;

/// `max_wait` as a multiple of the window unless set explicitly.
const DEFAULT_MAX_WAIT_FACTOR: u32 = 4;

/// Coalesces notifications for the same physical device.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    max_wait: Duration,
    pending: HashMap<DeviceKey, Pending>,
    coalesced: u64,
}

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    first_seen: Instant,
    descriptor: DeviceDescriptor,
}

impl Debouncer {
    /// Create a debouncer with the given window and a `max_wait` of four
    /// windows.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_wait: window.saturating_mul(DEFAULT_MAX_WAIT_FACTOR),
            pending: HashMap::new(),
            coalesced: 0,
        }
    }

    /// Longest a device may be held after its first notification. Clamped
    /// to at least the window.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(self.window);
        self
    }

    /// Longest a device may be held after its first notification.
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Record a notification observed at `now`.
    pub fn push(&mut self, descriptor: DeviceDescriptor, now: Instant) {
        let deadline = now.checked_add(self.window).unwrap_or(now);
        let key = descriptor.key();
        match self.pending.get_mut(&key) {
            Some(held) => {
                let cap = held
                    .first_seen
                    .checked_add(self.max_wait)
                    .unwrap_or(held.first_seen);
                held.deadline = deadline.min(cap);
                held.descriptor = descriptor;
                self.coalesced = self.coalesced.saturating_add(1);
            },
            None => {
                self.pending.insert(
                    key,
                    Pending {
                        deadline,
                        first_seen: now,
                        descriptor,
                    },
                );
            },
        }
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every descriptor whose window closed by `now`,
    /// in the order the devices were first seen.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<DeviceDescriptor> {
        let ready: Vec<DeviceKey> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        self.take_ordered(ready)
    }

    /// Remove and return everything pending, regardless of deadline.
    pub fn drain_all(&mut self) -> Vec<DeviceDescriptor> {
        let keys: Vec<DeviceKey> = self.pending.keys().cloned().collect();
        self.take_ordered(keys)
    }

    fn take_ordered(&mut self, keys: Vec<DeviceKey>) -> Vec<DeviceDescriptor> {
        let mut taken: Vec<Pending> = keys
            .into_iter()
            .filter_map(|k| self.pending.remove(&k))
            .collect();
        taken.sort_by_key(|p| p.first_seen);
        taken.into_iter().map(|p| p.descriptor).collect()
    }

    /// Devices currently held.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Notifications absorbed into an already pending one.
    #[must_use]
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotbridge_core::{BusLocation, DeviceAction, DeviceClass, ProductId, VendorId};

    fn scanner(action: DeviceAction, port: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(
            action,
            VendorId::new(0x04A9),
            ProductId::new(0x220E),
            DeviceClass::IMAGE,
            BusLocation::new(1, port).unwrap(),
        )
    }

    const WINDOW: Duration = Duration::from_millis(250);

    #[test]
    fn burst_collapses_to_latest() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.push(scanner(DeviceAction::Attach, "1"), t0);
        d.push(scanner(DeviceAction::Detach, "1"), t0 + Duration::from_millis(100));
        d.push(scanner(DeviceAction::Attach, "1"), t0 + Duration::from_millis(200));

        assert!(d.drain_ready(t0 + Duration::from_millis(300)).is_empty());
        let out = d.drain_ready(t0 + Duration::from_millis(450));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action(), DeviceAction::Attach);
        assert_eq!(d.coalesced(), 2);
        assert_eq!(d.pending_len(), 0);
    }

    #[test]
    fn spaced_notifications_stay_separate() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.push(scanner(DeviceAction::Attach, "1"), t0);
        assert_eq!(d.drain_ready(t0 + WINDOW).len(), 1);
        d.push(scanner(DeviceAction::Detach, "1"), t0 + Duration::from_millis(600));
        assert_eq!(d.drain_ready(t0 + Duration::from_millis(900)).len(), 1);
        assert_eq!(d.coalesced(), 0);
    }

    #[test]
    fn distinct_devices_are_independent_and_ordered() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.push(scanner(DeviceAction::Attach, "2"), t0);
        d.push(scanner(DeviceAction::Attach, "1"), t0 + Duration::from_millis(10));
        let out = d.drain_all();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bus_location().port_path(), "2");
        assert_eq!(out[1].bus_location().port_path(), "1");
    }

    #[test]
    fn flapping_device_is_emitted_within_max_wait() {
        let mut d = Debouncer::new(WINDOW);
        assert_eq!(d.max_wait(), WINDOW * 4);
        let t0 = Instant::now();
        let step = Duration::from_millis(200);

        let mut emitted = Vec::new();
        let mut held_since = t0;
        let mut elapsed = Duration::ZERO;
        while elapsed <= Duration::from_secs(8) {
            let now = t0 + elapsed;
            let ready = d.drain_ready(now);
            if !ready.is_empty() {
                assert!(now - held_since <= d.max_wait());
                emitted.extend(ready);
                held_since = now;
            }
            let action = if elapsed.as_millis() % 400 == 0 {
                DeviceAction::Attach
            } else {
                DeviceAction::Detach
            };
            d.push(scanner(action, "1"), now);
            elapsed += step;
        }

        // One report per max_wait while the device never settles.
        assert!(emitted.len() >= 7, "emitted {}", emitted.len());
        assert_eq!(d.pending_len(), 1);
    }

    #[test]
    fn max_wait_never_undercuts_the_window() {
        let d = Debouncer::new(WINDOW).with_max_wait(Duration::from_millis(10));
        assert_eq!(d.max_wait(), WINDOW);
    }

    #[test]
    fn capped_deadline_holds_latest_state() {
        let mut d = Debouncer::new(WINDOW).with_max_wait(Duration::from_millis(500));
        let t0 = Instant::now();
        d.push(scanner(DeviceAction::Attach, "1"), t0);
        d.push(scanner(DeviceAction::Detach, "1"), t0 + Duration::from_millis(200));
        d.push(scanner(DeviceAction::Attach, "1"), t0 + Duration::from_millis(400));
        assert_eq!(d.next_deadline(), Some(t0 + Duration::from_millis(500)));

        let out = d.drain_ready(t0 + Duration::from_millis(500));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].action(), DeviceAction::Attach);
    }

    #[test]
    fn next_deadline_tracks_earliest() {
        let mut d = Debouncer::new(WINDOW);
        assert!(d.next_deadline().is_none());
        let t0 = Instant::now();
        d.push(scanner(DeviceAction::Attach, "1"), t0);
        assert_eq!(d.next_deadline(), Some(t0 + WINDOW));
    }
}
