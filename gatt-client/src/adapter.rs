use async_trait::async_trait;
use std::fmt::{self, Debug, Display, Formatter};

use crate::{
    BluetoothError, CharacteristicId, CharacteristicInfo, DescriptorId, DescriptorInfo, DeviceId,
    ServiceId, ServiceInfo, WriteType,
};

/// Opaque identifier for a Bluetooth adapter, e.g. the serial port or HCI device it is attached
/// through.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AdapterId {
    pub(crate) name: String,
}

impl AdapterId {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

impl Display for AdapterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The GATT client operations of an open Bluetooth adapter.
///
/// Every call is a single request with a single result; attributes are addressed by the typed IDs
/// which earlier discovery calls returned. Implementations are provided by the host which owns the
/// radio driver.
#[async_trait]
pub trait BleAdapter: Debug + Send + Sync {
    /// The ID of this adapter.
    fn id(&self) -> AdapterId;

    /// Get a list of all GATT services which the given connected device offers.
    async fn get_services(&self, device: &DeviceId) -> Result<Vec<ServiceInfo>, BluetoothError>;

    /// Get a list of all characteristics on the given GATT service.
    async fn get_characteristics(
        &self,
        service: &ServiceId,
    ) -> Result<Vec<CharacteristicInfo>, BluetoothError>;

    /// Get a list of all descriptors on the given GATT characteristic.
    async fn get_descriptors(
        &self,
        characteristic: &CharacteristicId,
    ) -> Result<Vec<DescriptorInfo>, BluetoothError>;

    /// Read the value of the given GATT characteristic.
    async fn read_characteristic_value(
        &self,
        id: &CharacteristicId,
    ) -> Result<Vec<u8>, BluetoothError>;

    /// Write the given value to the given GATT characteristic.
    async fn write_characteristic_value(
        &self,
        id: &CharacteristicId,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), BluetoothError>;

    /// Read the value of the given GATT descriptor.
    async fn read_descriptor_value(&self, id: &DescriptorId) -> Result<Vec<u8>, BluetoothError>;

    /// Write the given value to the given GATT descriptor.
    async fn write_descriptor_value(
        &self,
        id: &DescriptorId,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), BluetoothError>;
}
