use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::{BluetoothError, CharacteristicId, DescriptorId, DeviceId, ServiceId};

/// The ID of any node in a device's attribute hierarchy.
///
/// The string form is the compound instance ID `device[.service[.characteristic[.descriptor]]]`,
/// where each segment after the device is the decimal attribute handle.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AttributeId {
    Device(DeviceId),
    Service(ServiceId),
    Characteristic(CharacteristicId),
    Descriptor(DescriptorId),
}

impl AttributeId {
    /// The device which the attribute belongs to.
    pub fn device(&self) -> &DeviceId {
        match self {
            Self::Device(id) => id,
            Self::Service(id) => id.device(),
            Self::Characteristic(id) => id.service().device(),
            Self::Descriptor(id) => id.characteristic().service().device(),
        }
    }

    /// The ID of the parent node, or `None` for a device.
    pub fn parent(&self) -> Option<AttributeId> {
        match self {
            Self::Device(_) => None,
            Self::Service(id) => Some(id.device().clone().into()),
            Self::Characteristic(id) => Some(id.service().clone().into()),
            Self::Descriptor(id) => Some(id.characteristic().clone().into()),
        }
    }

    /// The number of segments in the instance ID: 1 for a device, up to 4 for a descriptor.
    pub fn depth(&self) -> usize {
        match self {
            Self::Device(_) => 1,
            Self::Service(_) => 2,
            Self::Characteristic(_) => 3,
            Self::Descriptor(_) => 4,
        }
    }
}

impl Display for AttributeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => id.fmt(f),
            Self::Service(id) => id.fmt(f),
            Self::Characteristic(id) => id.fmt(f),
            Self::Descriptor(id) => id.fmt(f),
        }
    }
}

impl FromStr for AttributeId {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BluetoothError::InvalidInstanceId(s.to_owned());
        let mut segments = s.split('.');
        let device = DeviceId::new(segments.next().ok_or_else(invalid)?).map_err(|_| invalid())?;
        let handles = segments
            .map(|segment| segment.parse::<u16>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match handles.as_slice() {
            [] => Ok(Self::Device(device)),
            [service] => Ok(Self::Service(device.service(*service))),
            [service, characteristic] => Ok(Self::Characteristic(
                device.service(*service).characteristic(*characteristic),
            )),
            [service, characteristic, descriptor] => Ok(Self::Descriptor(
                device
                    .service(*service)
                    .characteristic(*characteristic)
                    .descriptor(*descriptor),
            )),
            _ => Err(invalid()),
        }
    }
}

impl From<DeviceId> for AttributeId {
    fn from(id: DeviceId) -> Self {
        Self::Device(id)
    }
}

impl From<ServiceId> for AttributeId {
    fn from(id: ServiceId) -> Self {
        Self::Service(id)
    }
}

impl From<CharacteristicId> for AttributeId {
    fn from(id: CharacteristicId) -> Self {
        Self::Characteristic(id)
    }
}

impl From<DescriptorId> for AttributeId {
    fn from(id: DescriptorId) -> Self {
        Self::Descriptor(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_each_depth() {
        let device = DeviceId::new("dev0").unwrap();
        let service = device.service(1);
        let characteristic = service.characteristic(2);
        let descriptor = characteristic.descriptor(3);

        assert_eq!("dev0".parse::<AttributeId>(), Ok(AttributeId::Device(device)));
        assert_eq!("dev0.1".parse::<AttributeId>(), Ok(AttributeId::Service(service)));
        assert_eq!(
            "dev0.1.2".parse::<AttributeId>(),
            Ok(AttributeId::Characteristic(characteristic))
        );
        assert_eq!(
            "dev0.1.2.3".parse::<AttributeId>(),
            Ok(AttributeId::Descriptor(descriptor))
        );
    }

    #[test]
    fn parse_invalid() {
        for s in ["", ".1", "dev0.x", "dev0.1.2.3.4", "dev0..2", "dev0.70000"] {
            assert_eq!(
                s.parse::<AttributeId>(),
                Err(BluetoothError::InvalidInstanceId(s.to_string())),
                "{:?}",
                s
            );
        }
    }

    #[test]
    fn parent_has_one_fewer_segment() {
        let id: AttributeId = "dev0.1.2.3".parse().unwrap();
        let mut current = Some(id);
        let mut depth = 4;
        while let Some(id) = current {
            assert_eq!(id.depth(), depth);
            assert_eq!(id.device().to_string(), "dev0");
            depth -= 1;
            current = id.parent();
        }
        assert_eq!(depth, 0);
    }

    #[test]
    fn display_matches_instance_id() {
        let id: AttributeId = "hci0_dev_11_22.12.13.15".parse().unwrap();
        assert_eq!(id.to_string(), "hci0_dev_11_22.12.13.15");
    }
}
