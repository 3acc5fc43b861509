use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

use crate::{uuid_from_u16, CharacteristicId};

/// UUID of the Client Characteristic Configuration Descriptor, which is written to enable or
/// disable notifications and indications for its characteristic.
pub const CCCD_UUID: Uuid = uuid_from_u16(0x2902);

/// Opaque identifier for a GATT characteristic descriptor on a Bluetooth device.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DescriptorId {
    pub(crate) characteristic: CharacteristicId,
    pub(crate) handle: u16,
}

impl DescriptorId {
    pub fn new(characteristic: CharacteristicId, handle: u16) -> Self {
        Self {
            characteristic,
            handle,
        }
    }

    /// Get the ID of the characteristic on which this descriptor was discovered.
    pub fn characteristic(&self) -> &CharacteristicId {
        &self.characteristic
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }
}

impl Display for DescriptorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.characteristic, self.handle)
    }
}

/// Information about a GATT descriptor on a Bluetooth device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptorInfo {
    /// An opaque identifier for the descriptor on the device.
    pub id: DescriptorId,
    /// The 128-bit UUID of the descriptor.
    pub uuid: Uuid,
}
