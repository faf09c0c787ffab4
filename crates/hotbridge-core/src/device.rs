//! Device identity and descriptor types.
//!
//! A [`DeviceDescriptor`] is the normalized notification the device monitor
//! emits for every attach or detach. It is immutable once created; the
//! publisher wraps it into a [`HotplugEvent`](crate::HotplugEvent) before it
//! reaches the log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

/// Parse 1-4 hex digits with an optional `0x`/`0X` prefix.
fn parse_hex_u16(raw: &str) -> CoreResult<u16> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidHexId(raw.to_string()));
    }
    u16::from_str_radix(digits, 16).map_err(|_| CoreError::InvalidHexId(raw.to_string()))
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u16);

        impl $name {
            /// Wrap a raw 16-bit id.
            #[must_use]
            pub const fn new(raw: u16) -> Self {
                Self(raw)
            }

            /// Parse a hexadecimal id such as `0x04A9` or `04a9`.
            ///
            /// # Errors
            ///
            /// Returns [`CoreError::InvalidHexId`] if the value is not 1-4 hex digits.
            pub fn parse_hex(raw: &str) -> CoreResult<Self> {
                parse_hex_u16(raw).map(Self)
            }

            /// The raw 16-bit value.
            #[must_use]
            pub const fn value(self) -> u16 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:04X}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::parse_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_id!(
    /// USB vendor id (`idVendor`), rendered as `0xXXXX`.
    VendorId
);

hex_id!(
    /// USB product id (`idProduct`), rendered as `0xXXXX`.
    ProductId
);

/// USB device class code (`bDeviceClass`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceClass(pub u8);

impl DeviceClass {
    /// Class is defined per interface (`0x00`).
    pub const PER_INTERFACE: Self = Self(0x00);
    /// Still image devices such as scanners and cameras (`0x06`).
    pub const IMAGE: Self = Self(0x06);
    /// Mass storage (`0x08`).
    pub const MASS_STORAGE: Self = Self(0x08);
    /// Hubs (`0x09`).
    pub const HUB: Self = Self(0x09);
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical location of a device on the host: bus number plus port path.
///
/// Rendered the way sysfs names devices, e.g. `1-1.2` for bus 1, port 1,
/// downstream port 2.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusLocation {
    bus: u16,
    port_path: String,
}

impl BusLocation {
    /// Create a bus location from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidBusLocation`] if the port path is empty or
    /// contains anything other than digits separated by dots.
    pub fn new(bus: u16, port_path: impl Into<String>) -> CoreResult<Self> {
        let port_path = port_path.into();
        if !is_valid_port_path(&port_path) {
            return Err(CoreError::InvalidBusLocation(format!("{bus}-{port_path}")));
        }
        Ok(Self { bus, port_path })
    }

    /// Parse a sysfs-style location such as `3-1.4`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidBusLocation`] on malformed input.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let (bus, ports) = raw
            .split_once('-')
            .ok_or_else(|| CoreError::InvalidBusLocation(raw.to_string()))?;
        let bus: u16 = bus
            .parse()
            .map_err(|_| CoreError::InvalidBusLocation(raw.to_string()))?;
        Self::new(bus, ports).map_err(|_| CoreError::InvalidBusLocation(raw.to_string()))
    }

    /// The bus number. Sequence numbers are assigned per bus.
    #[must_use]
    pub fn bus(&self) -> u16 {
        self.bus
    }

    /// Dot-separated port chain from the root hub.
    #[must_use]
    pub fn port_path(&self) -> &str {
        &self.port_path
    }
}

fn is_valid_port_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
}

impl fmt::Display for BusLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.bus, self.port_path)
    }
}

impl Serialize for BusLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BusLocation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Whether a device appeared or disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    /// The device was plugged in.
    Attach,
    /// The device was removed.
    Detach,
}

impl DeviceAction {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attach" => Ok(Self::Attach),
            "detach" => Ok(Self::Detach),
            other => Err(CoreError::InvalidAction(other.to_string())),
        }
    }
}

/// Normalized description of a device attach or detach.
///
/// Fields are private so a descriptor cannot be altered after the monitor
/// creates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    action: DeviceAction,
    vendor_id: VendorId,
    product_id: ProductId,
    serial_number: Option<String>,
    device_class: DeviceClass,
    bus_location: BusLocation,
    #[serde(rename = "timestamp")]
    captured_at: DateTime<Utc>,
}

impl DeviceDescriptor {
    /// Capture a descriptor now.
    #[must_use]
    pub fn new(
        action: DeviceAction,
        vendor_id: VendorId,
        product_id: ProductId,
        device_class: DeviceClass,
        bus_location: BusLocation,
    ) -> Self {
        Self {
            action,
            vendor_id,
            product_id,
            serial_number: None,
            device_class,
            bus_location,
            captured_at: Utc::now(),
        }
    }

    /// Attach a serial number (builder style, before the descriptor is shared).
    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    /// Override the capture timestamp (builder style).
    #[must_use]
    pub fn with_captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Derive the opposite-action descriptor for the same physical device,
    /// captured now. Used when a device disappears and only its cached
    /// attach descriptor is known.
    #[must_use]
    pub fn to_detached(&self) -> Self {
        Self {
            action: DeviceAction::Detach,
            captured_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Attach or detach.
    #[must_use]
    pub fn action(&self) -> DeviceAction {
        self.action
    }

    /// Vendor id.
    #[must_use]
    pub fn vendor_id(&self) -> VendorId {
        self.vendor_id
    }

    /// Product id.
    #[must_use]
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Serial number, if the device reports one.
    #[must_use]
    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    /// Device class code.
    #[must_use]
    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    /// Physical location.
    #[must_use]
    pub fn bus_location(&self) -> &BusLocation {
        &self.bus_location
    }

    /// When the monitor observed the change.
    #[must_use]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Identity of the physical device, independent of action and time.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            bus_location: self.bus_location.clone(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_number: self.serial_number.clone(),
        }
    }
}

/// Identity of one physical device, used to coalesce bouncing notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Where the device is plugged in.
    pub bus_location: BusLocation,
    /// Vendor id.
    pub vendor_id: VendorId,
    /// Product id.
    pub product_id: ProductId,
    /// Serial number, if reported.
    pub serial_number: Option<String>,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.bus_location, self.vendor_id, self.product_id
        )?;
        if let Some(serial) = &self.serial_number {
            write!(f, "#{serial}")?;
        }
        Ok(())
    }
}
