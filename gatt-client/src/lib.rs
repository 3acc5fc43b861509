//! Type-safe building blocks for a Bluetooth Low Energy GATT client (i.e. central, in Bluetooth
//! terminology): hierarchical IDs for devices, services, characteristics and descriptors,
//! information about discovered attributes, and the [`BleAdapter`] trait through which an open
//! adapter performs discovery and attribute I/O.
//!
//! [`SimulatedAdapter`] implements `BleAdapter` over an in-memory GATT database, for tests and for
//! exploring recorded peripherals without a radio.

mod adapter;
mod attribute;
mod bleuuid;
mod characteristic;
mod descriptor;
mod device;
mod service;
mod simulated;

pub use self::adapter::{AdapterId, BleAdapter};
pub use self::attribute::AttributeId;
pub use self::bleuuid::{parse_ble_uuid, uuid_from_u16, uuid_from_u32, BleUuid};
pub use self::characteristic::{CharacteristicFlags, CharacteristicId, CharacteristicInfo};
pub use self::descriptor::{DescriptorId, DescriptorInfo, CCCD_UUID};
pub use self::device::DeviceId;
pub use self::service::{ServiceId, ServiceInfo};
pub use self::simulated::{Call, Operation, SimulatedAdapter};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// An error carrying out a Bluetooth operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BluetoothError {
    /// The adapter reported an error for the operation.
    #[error("Adapter error: {0}")]
    Adapter(String),
    /// The device is not connected to the adapter.
    #[error("Device {0} is not connected.")]
    NotConnected(DeviceId),
    /// The adapter has no attribute with the given ID.
    #[error("No attribute {0} on the adapter.")]
    UnknownAttribute(AttributeId),
    /// A compound instance ID string was malformed.
    #[error("Invalid instance ID {0:?}")]
    InvalidInstanceId(String),
    /// Error parsing a UUID from a string.
    #[error("Error parsing UUID string {0:?}")]
    UuidParseError(String),
    /// Error parsing a characteristic flag from a string.
    #[error("Invalid characteristic flag {0:?}")]
    FlagParseError(String),
    /// Error parsing a recorded peripheral for the simulated adapter.
    #[error("Error parsing peripheral fixture: {0}")]
    FixtureParseError(String),
}

/// The type of write operation to use.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WriteType {
    /// A write operation where the device is expected to respond with a confirmation or error. Also
    /// known as a request. This corresponds to [`CharacteristicFlags::WRITE`].
    WithResponse,
    /// A write-without-response, also known as a command. This corresponds to
    /// [`CharacteristicFlags::WRITE_WITHOUT_RESPONSE`].
    WithoutResponse,
}

impl WriteType {
    /// Choose the write type for a characteristic with the given flags: a request if the
    /// characteristic supports it, otherwise a command if only that is supported, otherwise a
    /// request.
    pub fn for_flags(flags: CharacteristicFlags) -> Self {
        if flags.contains(CharacteristicFlags::WRITE) {
            Self::WithResponse
        } else if flags.contains(CharacteristicFlags::WRITE_WITHOUT_RESPONSE) {
            Self::WithoutResponse
        } else {
            Self::WithResponse
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::WithResponse => "request",
            Self::WithoutResponse => "command",
        }
    }
}

impl Display for WriteType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
