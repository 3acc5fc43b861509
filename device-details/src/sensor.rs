//! Sensors: the characteristics which a device profile names, found on the selected device.

use gatt_client::{AttributeId, CharacteristicId, DescriptorId, DeviceId, CCCD_UUID};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::decode::{SensorValue, ValueFormat};
use crate::profile::{DeviceDefinition, SensorDefinition};
use crate::{AttributeInfo, DetailsError, DeviceDetails};

const NOTIFY_ON: [u8; 2] = [1, 0];
const NOTIFY_OFF: [u8; 2] = [0, 0];

/// How far finding a sensor's characteristic on the selected device has got.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// Not looked for yet, or looking failed because discovery failed.
    Unresolved,
    /// Services or characteristics are being discovered.
    Resolving,
    /// The characteristic was found and its descriptors discovered.
    Resolved,
    /// The device doesn't have the sensor's service or characteristic.
    Unavailable,
}

/// A sensor of the selected device.
#[derive(Clone, Debug, PartialEq)]
pub struct Sensor {
    /// `<device>.sensor.<name>`
    pub id: String,
    pub name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub unit: Option<String>,
    pub format: ValueFormat,
    pub resolution: Resolution,
    pub characteristic: Option<CharacteristicId>,
    /// The characteristic's Client Characteristic Configuration Descriptor, if it has one.
    pub cccd: Option<DescriptorId>,
    /// The last value read or notified.
    pub value: Option<SensorValue>,
    /// Whether notifications have been switched on.
    pub is_on: bool,
}

impl Sensor {
    fn new(device: &DeviceId, definition: &SensorDefinition) -> Self {
        Self {
            id: format!("{}.sensor.{}", device, definition.name),
            name: definition.name.clone(),
            service_uuid: definition.service_uuid,
            characteristic_uuid: definition.characteristic_uuid,
            unit: definition.unit.clone(),
            format: definition.format,
            resolution: Resolution::Unresolved,
            characteristic: None,
            cccd: None,
            value: None,
            is_on: false,
        }
    }
}

#[derive(Debug, Default)]
struct Selection {
    device: Option<DeviceId>,
    sensors: Vec<Sensor>,
}

impl Selection {
    fn sensor_mut(&mut self, device: &DeviceId, name: &str) -> Option<&mut Sensor> {
        if self.device.as_ref() != Some(device) {
            return None;
        }
        self.sensors.iter_mut().find(|sensor| sensor.name == name)
    }
}

/// Projects the sensors of a [`DeviceDefinition`] onto whichever device is selected.
#[derive(Debug)]
pub struct SensorProjection {
    details: Arc<DeviceDetails>,
    profile: DeviceDefinition,
    selection: Mutex<Selection>,
}

impl SensorProjection {
    pub fn new(details: Arc<DeviceDetails>, profile: DeviceDefinition) -> Self {
        Self {
            details,
            profile,
            selection: Mutex::new(Selection::default()),
        }
    }

    pub fn profile(&self) -> &DeviceDefinition {
        &self.profile
    }

    /// The device whose sensors are being projected, if any.
    pub async fn device(&self) -> Option<DeviceId> {
        self.selection.lock().await.device.clone()
    }

    /// The resolved sensors of the selected device, in profile order.
    pub async fn sensors(&self) -> Vec<Sensor> {
        self.selection
            .lock()
            .await
            .sensors
            .iter()
            .filter(|sensor| sensor.resolution == Resolution::Resolved)
            .cloned()
            .collect()
    }

    /// Every sensor in the profile for the selected device, whether resolved or not.
    pub async fn all_sensors(&self) -> Vec<Sensor> {
        self.selection.lock().await.sensors.clone()
    }

    pub async fn sensor(&self, name: &str) -> Option<Sensor> {
        self.selection
            .lock()
            .await
            .sensors
            .iter()
            .find(|sensor| sensor.name == name)
            .cloned()
    }

    /// Forget the selected device and its sensors.
    pub async fn clear(&self) {
        *self.selection.lock().await = Selection::default();
    }

    /// Select the given device and find each sensor of the profile on it, discovering services,
    /// characteristics and descriptors as needed. Sensors whose service or characteristic the
    /// device lacks are unavailable, which is not an error.
    ///
    /// Returns the resolved sensors. If another device is selected before this finishes, the rest
    /// of the results are dropped.
    pub async fn select_device(&self, device: DeviceId) -> Result<Vec<Sensor>, DetailsError> {
        {
            let mut selection = self.selection.lock().await;
            selection.device = Some(device.clone());
            selection.sensors = self
                .profile
                .sensors
                .iter()
                .map(|definition| Sensor::new(&device, definition))
                .collect();
        }
        log::debug!(
            "Resolving {} sensors of {} on {}",
            self.profile.sensors.len(),
            self.profile.name,
            device
        );

        let services = self
            .details
            .children_or_discover(&device.clone().into())
            .await?;
        for definition in &self.profile.sensors {
            if !self.resolve(&device, definition, &services).await {
                log::debug!("Device {} deselected while resolving sensors", device);
                return Ok(Vec::new());
            }
        }
        Ok(self.sensors().await)
    }

    /// Resolve one sensor. Returns false if the device is no longer selected.
    async fn resolve(
        &self,
        device: &DeviceId,
        definition: &SensorDefinition,
        services: &[AttributeInfo],
    ) -> bool {
        let Some(service) = find_by_uuid(services, definition.service_uuid) else {
            return self
                .update(device, &definition.name, |sensor| {
                    sensor.resolution = Resolution::Unavailable
                })
                .await;
        };
        if !self
            .update(device, &definition.name, |sensor| {
                sensor.resolution = Resolution::Resolving
            })
            .await
        {
            return false;
        }

        let Ok(characteristics) = self.details.children_or_discover(&service).await else {
            return self
                .update(device, &definition.name, |sensor| {
                    sensor.resolution = Resolution::Unresolved
                })
                .await;
        };
        let characteristic = characteristics.into_iter().find_map(|info| match info {
            AttributeInfo::Characteristic(info) if info.uuid == definition.characteristic_uuid => {
                Some(info.id)
            }
            _ => None,
        });
        let Some(characteristic) = characteristic else {
            return self
                .update(device, &definition.name, |sensor| {
                    sensor.resolution = Resolution::Unavailable
                })
                .await;
        };

        let Ok(descriptors) = self
            .details
            .children_or_discover(&characteristic.clone().into())
            .await
        else {
            return self
                .update(device, &definition.name, |sensor| {
                    sensor.resolution = Resolution::Unresolved
                })
                .await;
        };
        let cccd = descriptors.into_iter().find_map(|info| match info {
            AttributeInfo::Descriptor(info) if info.uuid == CCCD_UUID => Some(info.id),
            _ => None,
        });
        log::debug!("Sensor {} is {}", definition.name, characteristic);
        self.update(device, &definition.name, |sensor| {
            sensor.resolution = Resolution::Resolved;
            sensor.characteristic = Some(characteristic);
            sensor.cccd = cccd;
        })
        .await
    }

    /// Apply the given change to the named sensor if the device is still selected. Returns
    /// whether it was.
    async fn update(&self, device: &DeviceId, name: &str, f: impl FnOnce(&mut Sensor)) -> bool {
        match self.selection.lock().await.sensor_mut(device, name) {
            Some(sensor) => {
                f(sensor);
                true
            }
            None => false,
        }
    }

    /// The selected device and the named sensor, which must be resolved.
    async fn resolved(&self, name: &str) -> Result<(DeviceId, Sensor), DetailsError> {
        let selection = self.selection.lock().await;
        let device = selection
            .device
            .clone()
            .ok_or(DetailsError::NoDeviceSelected)?;
        let sensor = selection
            .sensors
            .iter()
            .find(|sensor| sensor.name == name)
            .ok_or_else(|| DetailsError::UnknownSensor(name.to_owned()))?;
        if sensor.resolution != Resolution::Resolved {
            return Err(DetailsError::SensorNotResolved(name.to_owned()));
        }
        Ok((device, sensor.clone()))
    }

    /// Read the named sensor's characteristic, and store and return the decoded value. If the
    /// read fails the sensor's value is cleared.
    pub async fn read_sensor(&self, name: &str) -> Result<SensorValue, DetailsError> {
        let (device, sensor) = self
            .resolved(name)
            .await
            .map_err(|e| self.details.report(e))?;
        let characteristic = sensor
            .characteristic
            .ok_or_else(|| self.details.report(DetailsError::SensorNotResolved(name.to_owned())))?;
        let raw = match self.details.read_characteristic(&characteristic).await {
            Ok(raw) => raw,
            Err(e) => {
                self.update(&device, name, |sensor| sensor.value = None)
                    .await;
                return Err(e);
            }
        };
        self.store_value(&device, &sensor.name, sensor.format, &raw)
            .await
    }

    async fn store_value(
        &self,
        device: &DeviceId,
        name: &str,
        format: ValueFormat,
        raw: &[u8],
    ) -> Result<SensorValue, DetailsError> {
        let value = format.decode(raw).map_err(|source| {
            self.details.report(DetailsError::Decode {
                name: name.to_owned(),
                source,
            })
        })?;
        let stored = value.clone();
        if !self
            .update(device, name, |sensor| sensor.value = Some(stored))
            .await
        {
            log::debug!("Dropping value of sensor {} of deselected {}", name, device);
        }
        Ok(value)
    }

    /// Switch notifications of the named sensor on or off by writing its CCCD. The sensor is only
    /// marked as on or off once the write has succeeded.
    pub async fn switch_sensor(&self, name: &str, on: bool) -> Result<(), DetailsError> {
        let (device, sensor) = self
            .resolved(name)
            .await
            .map_err(|e| self.details.report(e))?;
        let cccd = match (sensor.cccd, sensor.characteristic) {
            (Some(cccd), _) => cccd,
            (None, characteristic) => {
                let parent = characteristic
                    .map(AttributeId::from)
                    .unwrap_or_else(|| device.clone().into());
                return Err(self.details.report(DetailsError::AttributeNotFound {
                    parent,
                    uuid: CCCD_UUID,
                }));
            }
        };
        let value = if on { NOTIFY_ON } else { NOTIFY_OFF };
        self.details.write_descriptor(&cccd, value.to_vec()).await?;
        log::debug!("Switched sensor {} {}", name, if on { "on" } else { "off" });
        if !self.update(&device, name, |sensor| sensor.is_on = on).await {
            log::debug!("Sensor {} switched after {} was deselected", name, device);
        }
        Ok(())
    }

    /// Record a value notified for the given characteristic, and decode it if it belongs to one
    /// of the selected device's sensors. Returns the sensor with its new value.
    pub async fn handle_notification(
        &self,
        characteristic: &CharacteristicId,
        value: &[u8],
    ) -> Result<Option<Sensor>, DetailsError> {
        self.details
            .handle_value_changed(characteristic.clone().into(), value.to_vec())
            .await;
        let found = {
            let selection = self.selection.lock().await;
            selection.device.clone().and_then(|device| {
                selection
                    .sensors
                    .iter()
                    .find(|sensor| sensor.characteristic.as_ref() == Some(characteristic))
                    .map(|sensor| (device, sensor.name.clone(), sensor.format))
            })
        };
        let Some((device, name, format)) = found else {
            return Ok(None);
        };
        self.store_value(&device, &name, format, value).await?;
        Ok(self.sensor(&name).await)
    }
}

fn find_by_uuid(attributes: &[AttributeInfo], uuid: Uuid) -> Option<AttributeId> {
    attributes
        .iter()
        .find(|info| info.uuid() == uuid)
        .map(AttributeInfo::id)
}
