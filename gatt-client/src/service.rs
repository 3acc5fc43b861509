use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

use crate::{CharacteristicId, DeviceId};

/// Opaque identifier for a GATT service on a Bluetooth device.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ServiceId {
    pub(crate) device: DeviceId,
    pub(crate) handle: u16,
}

impl ServiceId {
    pub fn new(device: DeviceId, handle: u16) -> Self {
        Self { device, handle }
    }

    /// Get the ID of the device on which this service was discovered.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// The attribute handle of the service declaration.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Get the ID of the characteristic with the given attribute handle within this service.
    pub fn characteristic(&self, handle: u16) -> CharacteristicId {
        CharacteristicId::new(self.clone(), handle)
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.handle)
    }
}

/// Information about a GATT service on a Bluetooth device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceInfo {
    /// An opaque identifier for the service on the device.
    pub id: ServiceId,
    /// The 128-bit UUID of the service.
    pub uuid: Uuid,
    /// Whether this GATT service is a primary service.
    pub primary: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_device() {
        let device_id = DeviceId::new("dev0").unwrap();
        let service_id = ServiceId::new(device_id.clone(), 1);
        assert_eq!(service_id.device(), &device_id);
        assert_eq!(service_id.to_string(), "dev0.1");
    }
}
