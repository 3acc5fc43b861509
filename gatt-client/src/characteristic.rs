use bitflags::bitflags;
use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

use crate::{BluetoothError, DescriptorId, ServiceId};

/// Opaque identifier for a GATT characteristic on a Bluetooth device.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CharacteristicId {
    pub(crate) service: ServiceId,
    pub(crate) handle: u16,
}

impl CharacteristicId {
    pub fn new(service: ServiceId, handle: u16) -> Self {
        Self { service, handle }
    }

    /// Get the ID of the service on which this characteristic was discovered.
    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// The attribute handle of the characteristic declaration.
    pub fn handle(&self) -> u16 {
        self.handle
    }

    /// Get the ID of the descriptor with the given attribute handle on this characteristic.
    pub fn descriptor(&self, handle: u16) -> DescriptorId {
        DescriptorId::new(self.clone(), handle)
    }
}

impl Display for CharacteristicId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.handle)
    }
}

/// Information about a GATT characteristic on a Bluetooth device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CharacteristicInfo {
    /// An opaque identifier for the characteristic on the device.
    pub id: CharacteristicId,
    /// The 128-bit UUID of the characteristic.
    pub uuid: Uuid,
    /// The set of flags (a.k.a. properties) of the characteristic, defining how the characteristic
    /// can be used.
    pub flags: CharacteristicFlags,
}

bitflags! {
    /// The set of flags (a.k.a. properties) of a characteristic, defining how the characteristic
    /// can be used.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct CharacteristicFlags: u16 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITE = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
        const RELIABLE_WRITE = 0x100;
        const WRITABLE_AUXILIARIES = 0x200;
    }
}

/// The names by which GATT tools and fixtures refer to each flag.
const FLAG_NAMES: [(&str, CharacteristicFlags); 10] = [
    ("broadcast", CharacteristicFlags::BROADCAST),
    ("read", CharacteristicFlags::READ),
    ("write_wo_resp", CharacteristicFlags::WRITE_WITHOUT_RESPONSE),
    ("write", CharacteristicFlags::WRITE),
    ("notify", CharacteristicFlags::NOTIFY),
    ("indicate", CharacteristicFlags::INDICATE),
    ("signed_write", CharacteristicFlags::SIGNED_WRITE),
    ("extended_properties", CharacteristicFlags::EXTENDED_PROPERTIES),
    ("reliable_write", CharacteristicFlags::RELIABLE_WRITE),
    ("writable_auxiliaries", CharacteristicFlags::WRITABLE_AUXILIARIES),
];

impl CharacteristicFlags {
    /// Look up a single flag by name. Hyphens and underscores are interchangeable, and
    /// `write-without-response` is accepted as well as `write_wo_resp`.
    pub fn from_gatt_name(name: &str) -> Option<Self> {
        let name = name.trim().replace('-', "_");
        let name = match name.as_str() {
            "write_without_response" => "write_wo_resp",
            "authenticated_signed_write" => "signed_write",
            other => other,
        };
        FLAG_NAMES
            .iter()
            .find(|(flag_name, _)| *flag_name == name)
            .map(|&(_, flag)| flag)
    }
}

impl Display for CharacteristicFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = FLAG_NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl TryFrom<Vec<String>> for CharacteristicFlags {
    type Error = BluetoothError;

    fn try_from(names: Vec<String>) -> Result<Self, BluetoothError> {
        names.into_iter().try_fold(Self::empty(), |flags, name| {
            Self::from_gatt_name(&name)
                .map(|flag| flags | flag)
                .ok_or(BluetoothError::FlagParseError(name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::DeviceId;
    use std::convert::TryInto;

    #[test]
    fn characteristic_service() {
        let service_id = DeviceId::new("dev0").unwrap().service(0x22);
        let characteristic_id = service_id.characteristic(0x33);
        assert_eq!(characteristic_id.service(), &service_id);
        assert_eq!(characteristic_id.to_string(), "dev0.34.51");
    }

    #[test]
    fn parse_flags() {
        let flags: CharacteristicFlags = vec!["read".to_string(), "write_wo_resp".to_string()]
            .try_into()
            .unwrap();
        assert_eq!(
            flags,
            CharacteristicFlags::READ | CharacteristicFlags::WRITE_WITHOUT_RESPONSE
        )
    }

    #[test]
    fn flag_names() {
        assert_eq!(
            CharacteristicFlags::from_gatt_name("write-without-response"),
            Some(CharacteristicFlags::WRITE_WITHOUT_RESPONSE)
        );
        assert_eq!(CharacteristicFlags::from_gatt_name("frobnicate"), None);
        let flags = CharacteristicFlags::READ | CharacteristicFlags::NOTIFY;
        assert_eq!(flags.to_string(), "read|notify");
        assert_eq!(CharacteristicFlags::empty().to_string(), "");
    }

    #[test]
    fn parse_flags_fail() {
        let flags: Result<CharacteristicFlags, BluetoothError> =
            vec!["read".to_string(), "invalid flag".to_string()].try_into();
        assert!(
            matches!(flags, Err(BluetoothError::FlagParseError(string)) if string == "invalid flag")
        );
    }
}
