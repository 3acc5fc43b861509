use gatt_client::{AttributeId, BleUuid, BluetoothError};
use thiserror::Error;
use uuid::Uuid;

use crate::decode::DecodeError;

/// An error carrying out a discovery, attribute I/O or sensor operation.
///
/// Every error returned from a public [`DeviceDetails`](crate::DeviceDetails) or
/// [`SensorProjection`](crate::SensorProjection) method has also been sent once as an
/// [`Event::Error`](crate::Event::Error).
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DetailsError {
    /// No Bluetooth adapter is selected, so nothing was attempted.
    #[error("No Bluetooth adapter selected.")]
    NoAdapterSelected,
    /// Discovering the children of a node failed. Any previously discovered children are kept.
    #[error("Discovering children of {id} failed: {source}")]
    DiscoveryFailed {
        id: AttributeId,
        source: BluetoothError,
    },
    /// Reading a value failed. The stored value has been cleared.
    #[error("Reading {id} failed: {source}")]
    ReadFailed {
        id: AttributeId,
        source: BluetoothError,
    },
    /// Writing a value failed. The stored value has been restored to the last known good value.
    #[error("Writing {id} failed: {source}")]
    WriteFailed {
        id: AttributeId,
        source: BluetoothError,
    },
    /// A discovered node has no child with the expected UUID.
    #[error("No attribute with UUID {} under {parent}", .uuid.succinctly())]
    AttributeNotFound { parent: AttributeId, uuid: Uuid },
    /// There is no node with the given ID in the attribute tree, e.g. because its device was
    /// disconnected.
    #[error("No attribute {0} in the attribute tree.")]
    UnknownAttribute(AttributeId),
    /// No device is selected for sensors.
    #[error("No device selected for sensors.")]
    NoDeviceSelected,
    /// The sensor profile has no sensor with the given name.
    #[error("No sensor named {0:?}.")]
    UnknownSensor(String),
    /// The sensor's characteristic has not been found on the selected device.
    #[error("Sensor {0:?} is not resolved.")]
    SensorNotResolved(String),
    /// The sensor's characteristic value could not be decoded.
    #[error("Decoding value of sensor {name:?} failed: {source}")]
    Decode { name: String, source: DecodeError },
}
