use async_trait::async_trait;
use serde_derive::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryInto;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    parse_ble_uuid, AdapterId, AttributeId, BleAdapter, BluetoothError, CharacteristicFlags,
    CharacteristicId, CharacteristicInfo, DescriptorId, DescriptorInfo, DeviceId, ServiceId,
    ServiceInfo, WriteType,
};

/// The kinds of request a [`BleAdapter`] serves.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    GetServices,
    GetCharacteristics,
    GetDescriptors,
    ReadCharacteristic,
    WriteCharacteristic,
    ReadDescriptor,
    WriteDescriptor,
}

/// A request which was made to a [`SimulatedAdapter`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub operation: Operation,
    /// The device or attribute the request was about.
    pub target: AttributeId,
    /// The value written, for writes.
    pub value: Option<Vec<u8>>,
    /// The type of write requested, for writes.
    pub write_type: Option<WriteType>,
}

impl Call {
    fn new(operation: Operation, target: impl Into<AttributeId>) -> Self {
        Self {
            operation,
            target: target.into(),
            value: None,
            write_type: None,
        }
    }

    fn write(
        operation: Operation,
        target: impl Into<AttributeId>,
        value: &[u8],
        write_type: WriteType,
    ) -> Self {
        Self {
            operation,
            target: target.into(),
            value: Some(value.to_vec()),
            write_type: Some(write_type),
        }
    }
}

/// A [`BleAdapter`] backed by an in-memory GATT database.
///
/// Every request is recorded, and failures can be injected per kind of operation. Each request
/// yields to the runtime once before it is served, so that concurrent requests interleave.
#[derive(Debug)]
pub struct SimulatedAdapter {
    id: AdapterId,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    services: BTreeMap<DeviceId, Vec<ServiceInfo>>,
    characteristics: HashMap<ServiceId, Vec<CharacteristicInfo>>,
    descriptors: HashMap<CharacteristicId, Vec<DescriptorInfo>>,
    attributes: HashSet<AttributeId>,
    values: HashMap<AttributeId, Vec<u8>>,
    failures: HashMap<Operation, String>,
    calls: Vec<Call>,
}

impl State {
    fn add_device(&mut self, device: &DeviceId) {
        self.services.entry(device.clone()).or_default();
    }

    fn add_service(&mut self, device: &DeviceId, handle: u16, uuid: Uuid, primary: bool) -> ServiceId {
        let id = device.service(handle);
        self.services
            .entry(device.clone())
            .or_default()
            .push(ServiceInfo {
                id: id.clone(),
                uuid,
                primary,
            });
        self.characteristics.entry(id.clone()).or_default();
        self.attributes.insert(id.clone().into());
        id
    }

    fn add_characteristic(
        &mut self,
        service: &ServiceId,
        handle: u16,
        uuid: Uuid,
        flags: CharacteristicFlags,
        value: Option<Vec<u8>>,
    ) -> CharacteristicId {
        let id = service.characteristic(handle);
        self.characteristics
            .entry(service.clone())
            .or_default()
            .push(CharacteristicInfo {
                id: id.clone(),
                uuid,
                flags,
            });
        self.descriptors.entry(id.clone()).or_default();
        self.add_attribute(id.clone().into(), value);
        id
    }

    fn add_descriptor(
        &mut self,
        characteristic: &CharacteristicId,
        handle: u16,
        uuid: Uuid,
        value: Option<Vec<u8>>,
    ) -> DescriptorId {
        let id = characteristic.descriptor(handle);
        self.descriptors
            .entry(characteristic.clone())
            .or_default()
            .push(DescriptorInfo {
                id: id.clone(),
                uuid,
            });
        self.add_attribute(id.clone().into(), value);
        id
    }

    fn add_attribute(&mut self, id: AttributeId, value: Option<Vec<u8>>) {
        if let Some(value) = value {
            self.values.insert(id.clone(), value);
        }
        self.attributes.insert(id);
    }

    /// Record the call, then fail it if a failure was injected for its operation.
    fn record(&mut self, call: Call) -> Result<(), BluetoothError> {
        log::trace!("Simulated {:?} on {}", call.operation, call.target);
        let operation = call.operation;
        self.calls.push(call);
        match self.failures.get(&operation) {
            Some(message) => Err(BluetoothError::Adapter(message.to_owned())),
            None => Ok(()),
        }
    }

    fn read(&self, id: AttributeId) -> Result<Vec<u8>, BluetoothError> {
        if !self.attributes.contains(&id) {
            return Err(BluetoothError::UnknownAttribute(id));
        }
        Ok(self.values.get(&id).cloned().unwrap_or_default())
    }

    fn write(&mut self, id: AttributeId, value: &[u8]) -> Result<(), BluetoothError> {
        if !self.attributes.contains(&id) {
            return Err(BluetoothError::UnknownAttribute(id));
        }
        self.values.insert(id, value.to_vec());
        Ok(())
    }
}

impl SimulatedAdapter {
    /// Create a simulated adapter with no devices connected.
    pub fn new(name: &str) -> Self {
        Self::with_state(name, State::default())
    }

    fn with_state(name: &str, state: State) -> Self {
        Self {
            id: AdapterId::new(name),
            state: Mutex::new(state),
        }
    }

    /// Create a simulated adapter with the devices described by the given recorded peripheral
    /// database, in TOML form.
    pub fn from_toml(name: &str, fixture: &str) -> Result<Self, BluetoothError> {
        let fixture: Fixture = toml::from_str(fixture)
            .map_err(|e| BluetoothError::FixtureParseError(e.to_string()))?;
        let mut state = State::default();
        for device in fixture.devices {
            let device_id = DeviceId::new(&device.id)?;
            state.add_device(&device_id);
            for service in device.services {
                let service_id = state.add_service(
                    &device_id,
                    service.handle,
                    parse_ble_uuid(&service.uuid)?,
                    service.primary,
                );
                for characteristic in service.characteristics {
                    let characteristic_id = state.add_characteristic(
                        &service_id,
                        characteristic.handle,
                        parse_ble_uuid(&characteristic.uuid)?,
                        characteristic.flags.try_into()?,
                        characteristic.value,
                    );
                    for descriptor in characteristic.descriptors {
                        state.add_descriptor(
                            &characteristic_id,
                            descriptor.handle,
                            parse_ble_uuid(&descriptor.uuid)?,
                            descriptor.value,
                        );
                    }
                }
            }
        }
        Ok(Self::with_state(name, state))
    }

    /// Connect a device with no services.
    pub async fn add_device(&self, device: &DeviceId) {
        self.state.lock().await.add_device(device);
    }

    /// Add a primary service to the given device, connecting it if necessary.
    pub async fn add_service(&self, device: &DeviceId, handle: u16, uuid: Uuid) -> ServiceId {
        self.state
            .lock()
            .await
            .add_service(device, handle, uuid, true)
    }

    pub async fn add_characteristic(
        &self,
        service: &ServiceId,
        handle: u16,
        uuid: Uuid,
        flags: CharacteristicFlags,
        value: Option<Vec<u8>>,
    ) -> CharacteristicId {
        self.state
            .lock()
            .await
            .add_characteristic(service, handle, uuid, flags, value)
    }

    pub async fn add_descriptor(
        &self,
        characteristic: &CharacteristicId,
        handle: u16,
        uuid: Uuid,
        value: Option<Vec<u8>>,
    ) -> DescriptorId {
        self.state
            .lock()
            .await
            .add_descriptor(characteristic, handle, uuid, value)
    }

    /// The devices which are connected, in order of their IDs.
    pub async fn devices(&self) -> Vec<DeviceId> {
        self.state.lock().await.services.keys().cloned().collect()
    }

    /// Make every subsequent request of the given kind fail with the given message.
    pub async fn fail(&self, operation: Operation, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(operation, message.to_owned());
    }

    /// Stop failing requests of the given kind.
    pub async fn succeed(&self, operation: Operation) {
        self.state.lock().await.failures.remove(&operation);
    }

    /// All requests made so far, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// The requests of the given kind made so far, in order.
    pub async fn calls_to(&self, operation: Operation) -> Vec<Call> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    /// The current value of the given characteristic or descriptor, if it has one.
    pub async fn value(&self, id: &AttributeId) -> Option<Vec<u8>> {
        self.state.lock().await.values.get(id).cloned()
    }
}

#[async_trait]
impl BleAdapter for SimulatedAdapter {
    fn id(&self) -> AdapterId {
        self.id.clone()
    }

    async fn get_services(&self, device: &DeviceId) -> Result<Vec<ServiceInfo>, BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::new(Operation::GetServices, device.clone()))?;
        state
            .services
            .get(device)
            .cloned()
            .ok_or_else(|| BluetoothError::NotConnected(device.clone()))
    }

    async fn get_characteristics(
        &self,
        service: &ServiceId,
    ) -> Result<Vec<CharacteristicInfo>, BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::new(Operation::GetCharacteristics, service.clone()))?;
        state
            .characteristics
            .get(service)
            .cloned()
            .ok_or_else(|| BluetoothError::UnknownAttribute(service.clone().into()))
    }

    async fn get_descriptors(
        &self,
        characteristic: &CharacteristicId,
    ) -> Result<Vec<DescriptorInfo>, BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::new(Operation::GetDescriptors, characteristic.clone()))?;
        state
            .descriptors
            .get(characteristic)
            .cloned()
            .ok_or_else(|| BluetoothError::UnknownAttribute(characteristic.clone().into()))
    }

    async fn read_characteristic_value(
        &self,
        id: &CharacteristicId,
    ) -> Result<Vec<u8>, BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::new(Operation::ReadCharacteristic, id.clone()))?;
        state.read(id.clone().into())
    }

    async fn write_characteristic_value(
        &self,
        id: &CharacteristicId,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::write(
            Operation::WriteCharacteristic,
            id.clone(),
            value,
            write_type,
        ))?;
        state.write(id.clone().into(), value)
    }

    async fn read_descriptor_value(&self, id: &DescriptorId) -> Result<Vec<u8>, BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::new(Operation::ReadDescriptor, id.clone()))?;
        state.read(id.clone().into())
    }

    async fn write_descriptor_value(
        &self,
        id: &DescriptorId,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), BluetoothError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record(Call::write(
            Operation::WriteDescriptor,
            id.clone(),
            value,
            write_type,
        ))?;
        state.write(id.clone().into(), value)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    #[serde(default)]
    devices: Vec<DeviceFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceFixture {
    id: String,
    #[serde(default)]
    services: Vec<ServiceFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceFixture {
    handle: u16,
    uuid: String,
    #[serde(default = "default_primary")]
    primary: bool,
    #[serde(default)]
    characteristics: Vec<CharacteristicFixture>,
}

fn default_primary() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CharacteristicFixture {
    handle: u16,
    uuid: String,
    #[serde(default)]
    flags: Vec<String>,
    value: Option<Vec<u8>>,
    #[serde(default)]
    descriptors: Vec<DescriptorFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFixture {
    handle: u16,
    uuid: String,
    value: Option<Vec<u8>>,
}
