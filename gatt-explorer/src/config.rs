use device_details::DeviceDefinition;
use eyre::Report;
use serde_derive::Deserialize;
use stable_eyre::eyre::WrapErr;
use std::fs::read_to_string;
use std::path::Path;

const DEFAULT_FIXTURE_FILENAME: &str = "peripheral.toml";
const CONFIG_FILENAME: &str = "gatt-explorer.toml";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub peripheral: PeripheralConfig,
    pub sensors: SensorsConfig,
    pub explorer: ExplorerConfig,
}

impl Config {
    /// Read the config from the given file, or from `gatt-explorer.toml` if none is given.
    pub fn from_file(filename: Option<&str>) -> Result<Config, Report> {
        Config::read(filename.unwrap_or(CONFIG_FILENAME))
    }

    fn read(filename: &str) -> Result<Config, Report> {
        let config_file =
            read_to_string(filename).wrap_err_with(|| format!("Reading {}", filename))?;
        Ok(toml::from_str(&config_file)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeripheralConfig {
    /// The recorded GATT database to load into the simulated adapter.
    pub fixture: String,
    /// The ID of the device to explore. Defaults to the first device in the fixture.
    pub device: Option<String>,
}

impl Default for PeripheralConfig {
    fn default() -> PeripheralConfig {
        PeripheralConfig {
            fixture: DEFAULT_FIXTURE_FILENAME.to_owned(),
            device: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorsConfig {
    /// A sensor profile TOML file. The bundled Nordic Thingy:52 profile is used if this is not
    /// set.
    pub profile: Option<String>,
    /// Whether to read each sensor once it has been found.
    pub read_on_resolve: bool,
    /// The names of the sensors to switch notifications on for.
    pub notify: Vec<String>,
}

impl Default for SensorsConfig {
    fn default() -> SensorsConfig {
        SensorsConfig {
            profile: None,
            read_on_resolve: true,
            notify: Vec::new(),
        }
    }
}

impl SensorsConfig {
    pub fn load_profile(&self) -> Result<DeviceDefinition, Report> {
        match &self.profile {
            Some(filename) => DeviceDefinition::read(Path::new(filename))
                .wrap_err_with(|| format!("Loading sensor profile {}", filename)),
            None => Ok(DeviceDefinition::nordic_thingy52()?),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerConfig {
    /// Expand every service and characteristic, discovering their children.
    pub expand_all: bool,
    /// Read every readable characteristic and every descriptor which has been discovered.
    pub read_all: bool,
}
