//! Sensor profiles: which characteristics of a kind of peripheral are sensors, and how to decode
//! them.

use gatt_client::{parse_ble_uuid, BluetoothError};
use serde_derive::Deserialize;
use std::collections::HashSet;
use std::fs::read_to_string;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::decode::ValueFormat;

const NORDIC_THINGY52: &str = include_str!("../profiles/nordic-thingy52.toml");
const SENSOR_FUNCTION: &str = "feature";

/// An error loading a sensor profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid profile: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{0}")]
    Uuid(#[from] BluetoothError),
    #[error("Duplicate sensor name {0:?}")]
    DuplicateSensor(String),
}

/// The sensors offered by one kind of peripheral.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceDefinition {
    pub name: String,
    pub sensors: Vec<SensorDefinition>,
}

/// A named characteristic whose value is a sensor reading.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorDefinition {
    pub name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// The unit of the decoded value, for display.
    pub unit: Option<String>,
    pub format: ValueFormat,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    name: String,
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceEntry {
    uuid: String,
    #[allow(dead_code)]
    name: Option<String>,
    #[serde(default)]
    characteristics: Vec<CharacteristicEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CharacteristicEntry {
    uuid: String,
    name: String,
    function: Option<String>,
    unit: Option<String>,
    #[serde(default)]
    format: ValueFormat,
}

impl DeviceDefinition {
    /// The profile of the Nordic Thingy:52, which is bundled with this crate.
    pub fn nordic_thingy52() -> Result<Self, ProfileError> {
        Self::from_toml(NORDIC_THINGY52)
    }

    /// Read a profile from the given TOML file.
    pub fn read(path: &Path) -> Result<Self, ProfileError> {
        let profile = read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&profile)
    }

    /// Parse a profile from TOML. Only characteristics whose function is `feature` become
    /// sensors.
    pub fn from_toml(profile: &str) -> Result<Self, ProfileError> {
        let profile: ProfileFile = toml::from_str(profile)?;
        let mut names = HashSet::new();
        let mut sensors = Vec::new();
        for service in profile.services {
            let service_uuid = parse_ble_uuid(&service.uuid)?;
            for characteristic in service.characteristics {
                if characteristic.function.as_deref() != Some(SENSOR_FUNCTION) {
                    continue;
                }
                if !names.insert(characteristic.name.clone()) {
                    return Err(ProfileError::DuplicateSensor(characteristic.name));
                }
                sensors.push(SensorDefinition {
                    service_uuid,
                    characteristic_uuid: parse_ble_uuid(&characteristic.uuid)?,
                    name: characteristic.name,
                    unit: characteristic.unit,
                    format: characteristic.format,
                });
            }
        }
        Ok(Self {
            name: profile.name,
            sensors,
        })
    }

    /// Get the definition of the sensor with the given name.
    pub fn sensor(&self, name: &str) -> Option<&SensorDefinition> {
        self.sensors.iter().find(|sensor| sensor.name == name)
    }
}
