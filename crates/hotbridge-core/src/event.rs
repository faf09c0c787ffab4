//! Log record types.
//!
//! A [`HotplugEvent`] is what the publisher appends to the event log. Its
//! serialized form is the wire record:
//!
//! ```text
//! {event_id, sequence, action, vendor_id, product_id, serial_number,
//!  device_class, bus_location, timestamp}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceDescriptor;

/// Position of an entry in the event log. The first entry has offset 0.
pub type Offset = u64;

/// Unique identifier of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a fresh random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A device change with its per-bus sequence number and unique id.
///
/// Append-only: once published, an event is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugEvent {
    event_id: EventId,
    sequence: u64,
    #[serde(flatten)]
    descriptor: DeviceDescriptor,
}

impl HotplugEvent {
    /// Wrap a descriptor. Only the publisher assigns sequence numbers.
    #[must_use]
    pub fn new(sequence: u64, descriptor: DeviceDescriptor) -> Self {
        Self {
            event_id: EventId::new(),
            sequence,
            descriptor,
        }
    }

    /// Unique event id.
    #[must_use]
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Per-bus sequence number (strictly increasing for a given bus).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Bus this event's sequence number belongs to.
    #[must_use]
    pub fn bus(&self) -> u16 {
        self.descriptor.bus_location().bus()
    }

    /// The underlying device descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

/// An event together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log.
    pub offset: Offset,
    /// The recorded event.
    pub event: HotplugEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BusLocation, DeviceAction, DeviceClass, ProductId, VendorId};

    fn event() -> HotplugEvent {
        let descriptor = DeviceDescriptor::new(
            DeviceAction::Detach,
            VendorId::new(0x03F0),
            ProductId::new(0x0001),
            DeviceClass(0xFF),
            BusLocation::parse("2-4").unwrap(),
        );
        HotplugEvent::new(7, descriptor)
    }

    #[test]
    fn wire_record_has_flat_fields() {
        let json = serde_json::to_value(event()).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "action",
                "bus_location",
                "device_class",
                "event_id",
                "product_id",
                "sequence",
                "serial_number",
                "timestamp",
                "vendor_id",
            ]
        );
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["action"], "detach");
    }

    #[test]
    fn wire_record_parses_back() {
        let original = event();
        let line = serde_json::to_string(&original).unwrap();
        let parsed: HotplugEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.bus(), 2);
    }

    #[test]
    fn event_ids_are_unique() {
        assert_ne!(event().event_id(), event().event_id());
    }
}
