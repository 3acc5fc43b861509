use uuid::Uuid;

use crate::BluetoothError;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const BLUETOOTH_BASE_MASK: u128 = 0x00000000_ffff_ffff_ffff_ffffffffffff;
const BLUETOOTH_BASE_MASK_16: u128 = 0xffff0000_ffff_ffff_ffff_ffffffffffff;

/// Convert a 32-bit BLE short UUID to a full 128-bit UUID by filling in the standard Bluetooth Base
/// UUID.
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Convert a 16-bit BLE short UUID to a full 128-bit UUID by filling in the standard Bluetooth Base
/// UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// Parse a UUID the way GATT tools usually write them: either a 16-bit or 32-bit short form
/// (`"2A00"`, `"0000180F"`), or a full 128-bit UUID with or without hyphens.
pub fn parse_ble_uuid(s: &str) -> Result<Uuid, BluetoothError> {
    let hex: String = s.trim().chars().filter(|&c| c != '-').collect();
    let parse_error = || BluetoothError::UuidParseError(s.to_owned());
    match hex.len() {
        4 => u16::from_str_radix(&hex, 16)
            .map(uuid_from_u16)
            .map_err(|_| parse_error()),
        8 => u32::from_str_radix(&hex, 16)
            .map(uuid_from_u32)
            .map_err(|_| parse_error()),
        32 => Uuid::parse_str(&hex).map_err(|_| parse_error()),
        _ => Err(parse_error()),
    }
}

/// An extension trait for `Uuid` which provides BLE-specific methods.
pub trait BleUuid {
    /// If the UUID is a valid BLE short UUID then return its short form, otherwise return `None`.
    fn to_ble_u32(&self) -> Option<u32>;

    /// If the UUID is a valid 16-bit BLE short UUID then return its short form, otherwise return
    /// `None`.
    fn to_ble_u16(&self) -> Option<u16>;

    /// Convert the UUID to the hyphen-free upper case form GATT browsers display: four hex digits
    /// for 16-bit short UUIDs, eight for 32-bit short UUIDs, and all 32 otherwise.
    fn succinctly(&self) -> String;
}

impl BleUuid for Uuid {
    fn to_ble_u32(&self) -> Option<u32> {
        let value = self.as_u128();
        if value & BLUETOOTH_BASE_MASK == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }

    fn to_ble_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        if value & BLUETOOTH_BASE_MASK_16 == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }

    fn succinctly(&self) -> String {
        if let Some(uuid16) = self.to_ble_u16() {
            format!("{:04X}", uuid16)
        } else if let Some(uuid32) = self.to_ble_u32() {
            format!("{:08X}", uuid32)
        } else {
            format!("{:032X}", self.as_u128())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_from_u32_test() {
        assert_eq!(
            uuid_from_u32(0x11223344),
            Uuid::parse_str("11223344-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn uuid_from_u16_test() {
        assert_eq!(
            uuid_from_u16(0x1122),
            Uuid::parse_str("00001122-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn succinctly() {
        assert_eq!(uuid_from_u16(0x2a00).succinctly(), "2A00");
        assert_eq!(uuid_from_u32(0x11223344).succinctly(), "11223344");
        assert_eq!(
            Uuid::parse_str("ef680200-9b35-4933-9b10-52ffa9740042")
                .unwrap()
                .succinctly(),
            "EF6802009B3549339B1052FFA9740042"
        );
    }

    #[test]
    fn to_short() {
        assert_eq!(uuid_from_u16(0x1800).to_ble_u16(), Some(0x1800));
        assert_eq!(uuid_from_u32(0x11223344).to_ble_u16(), None);
        assert_eq!(uuid_from_u32(0x11223344).to_ble_u32(), Some(0x11223344));
    }

    #[test]
    fn parse_short_and_long() {
        assert_eq!(parse_ble_uuid("2A00").unwrap(), uuid_from_u16(0x2a00));
        assert_eq!(parse_ble_uuid("2a00").unwrap(), uuid_from_u16(0x2a00));
        assert_eq!(parse_ble_uuid("0000180F").unwrap(), uuid_from_u16(0x180f));
        assert_eq!(
            parse_ble_uuid("EF6802019B3549339B1052FFA9740042").unwrap(),
            parse_ble_uuid("ef680201-9b35-4933-9b10-52ffa9740042").unwrap()
        );
    }

    #[test]
    fn parse_invalid() {
        assert_eq!(
            parse_ble_uuid("XYZW"),
            Err(BluetoothError::UuidParseError("XYZW".to_string()))
        );
        assert!(parse_ble_uuid("123").is_err());
        assert!(parse_ble_uuid("").is_err());
    }
}
