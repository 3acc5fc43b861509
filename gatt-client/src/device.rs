use std::fmt::{self, Display, Formatter};

use crate::{BluetoothError, ServiceId};

/// Opaque identifier for a connected Bluetooth device, as assigned by the adapter it is connected
/// through. This is the first segment of every attribute instance ID on the device.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId {
    pub(crate) instance: String,
}

impl DeviceId {
    /// Create a device ID from the adapter's instance string for it.
    ///
    /// The instance string must be non-empty and may not contain `.`, which separates the segments
    /// of attribute instance IDs.
    pub fn new(instance: &str) -> Result<Self, BluetoothError> {
        if instance.is_empty() || instance.contains('.') {
            return Err(BluetoothError::InvalidInstanceId(instance.to_owned()));
        }
        Ok(Self {
            instance: instance.to_owned(),
        })
    }

    /// Get the ID of the service with the given attribute handle on this device.
    pub fn service(&self, handle: u16) -> ServiceId {
        ServiceId::new(self.clone(), handle)
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_display() {
        let device_id = DeviceId::new("hci0_dev_11_22_33_44_55_66").unwrap();
        assert_eq!(device_id.to_string(), "hci0_dev_11_22_33_44_55_66");
    }

    #[test]
    fn device_invalid() {
        assert_eq!(
            DeviceId::new("dev.1"),
            Err(BluetoothError::InvalidInstanceId("dev.1".to_string()))
        );
        assert!(DeviceId::new("").is_err());
    }

    #[test]
    fn device_service() {
        let device_id = DeviceId::new("dev0").unwrap();
        let service_id = device_id.service(0x22);
        assert_eq!(service_id.device(), &device_id);
        assert_eq!(service_id.handle(), 0x22);
    }
}
