mod config;

use crate::config::Config;
use device_details::{
    AttributeInfo, AttributeNode, AttributeTree, DeviceDetails, Event, Resolution, Sensor,
    SensorProjection,
};
use eyre::{eyre, Report};
use futures::StreamExt;
use gatt_client::{AttributeId, BleUuid, CharacteristicFlags, DeviceId, SimulatedAdapter};
use stable_eyre::eyre::WrapErr;
use std::env;
use std::fs::read_to_string;
use std::ops::RangeInclusive;
use std::str;
use std::sync::Arc;

const ADAPTER_NAME: &str = "simulated";

#[tokio::main]
async fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    pretty_env_logger::init();
    color_backtrace::install();

    let config_filename = env::args().nth(1);
    let config = Config::from_file(config_filename.as_deref())?;
    let profile = config.sensors.load_profile()?;

    let fixture_filename = &config.peripheral.fixture;
    let fixture = read_to_string(fixture_filename)
        .wrap_err_with(|| format!("Reading {}", fixture_filename))?;
    let adapter = Arc::new(
        SimulatedAdapter::from_toml(ADAPTER_NAME, &fixture)
            .wrap_err_with(|| format!("Loading {}", fixture_filename))?,
    );
    let device = match &config.peripheral.device {
        Some(device) => DeviceId::new(device)?,
        None => adapter
            .devices()
            .await
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("No devices in {}", fixture_filename))?,
    };

    let (details, mut events) = DeviceDetails::new();
    let details = Arc::new(details);
    let event_handle = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            log_event(&event);
        }
    });

    details.select_adapter(adapter).await;
    details.device_connected(device.clone()).await;

    // Failures have already been logged from the event stream, so carry on with whatever was
    // discovered.
    details.discover_device(&device).await.ok();
    if config.explorer.expand_all {
        expand_all(&details, &device).await;
    }
    if config.explorer.read_all {
        read_all(&details, &device).await;
    }

    let sensors = SensorProjection::new(details.clone(), profile);
    let resolved = sensors
        .select_device(device.clone())
        .await
        .unwrap_or_default();
    if config.sensors.read_on_resolve {
        for sensor in &resolved {
            sensors.read_sensor(&sensor.name).await.ok();
        }
    }
    for name in &config.sensors.notify {
        sensors.switch_sensor(name, true).await.ok();
    }

    print_tree(&details.snapshot().await);
    println!();
    println!("Sensors ({}):", sensors.profile().name);
    for sensor in sensors.all_sensors().await {
        print_sensor(&sensor);
    }

    // Close the event stream so that the event task finishes.
    drop(sensors);
    drop(details);
    event_handle.await?;
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Error(e) => log::error!("{}", e),
        Event::NameDiscovered { device, name } => log::info!("{} is called {:?}", device, name),
        event => log::debug!("{:?}", event),
    }
}

/// Expand every service of the device and every characteristic of those services, so that their
/// children are discovered.
async fn expand_all(details: &DeviceDetails, device: &DeviceId) {
    for service in children_ids(details, &device.clone().into()).await {
        details.toggle_attribute_expanded(&service).await.ok();
        for characteristic in children_ids(details, &service).await {
            details.toggle_attribute_expanded(&characteristic).await.ok();
        }
    }
}

/// Read every readable characteristic of the device, and every discovered descriptor.
async fn read_all(details: &DeviceDetails, device: &DeviceId) {
    let tree = details.snapshot().await;
    let characteristics = tree
        .children(&device.clone().into())
        .unwrap_or_default()
        .into_iter()
        .flat_map(|service| tree.children(&service.id).unwrap_or_default());
    for characteristic in characteristics {
        if let Some(AttributeInfo::Characteristic(info)) = &characteristic.info {
            if info.flags.contains(CharacteristicFlags::READ) {
                details.read_characteristic(&info.id).await.ok();
            }
        }
        for descriptor in tree.children(&characteristic.id).unwrap_or_default() {
            if let AttributeId::Descriptor(id) = &descriptor.id {
                details.read_descriptor(id).await.ok();
            }
        }
    }
}

async fn children_ids(details: &DeviceDetails, id: &AttributeId) -> Vec<AttributeId> {
    details
        .snapshot()
        .await
        .children(id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| child.id.clone())
        .collect()
}

fn print_tree(tree: &AttributeTree) {
    for device in tree.devices() {
        println!(
            "Device {}: {}",
            device.id,
            device.name.as_deref().unwrap_or("(unnamed)")
        );
        print_children(tree, device, 1);
    }
}

fn print_children(tree: &AttributeTree, node: &AttributeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match tree.children(&node.id) {
        None => println!("{}(not discovered)", indent),
        Some(children) => {
            for child in children {
                print_node(child, &indent);
                if child.expanded || child.children.is_some() {
                    print_children(tree, child, depth + 1);
                }
            }
        }
    }
}

fn print_node(node: &AttributeNode, indent: &str) {
    let uuid = node
        .uuid()
        .map(|uuid| uuid.succinctly())
        .unwrap_or_default();
    match &node.info {
        Some(AttributeInfo::Service(info)) => println!(
            "{}Service {} ({}): {}",
            indent,
            uuid,
            if info.primary { "primary" } else { "secondary" },
            node.id
        ),
        Some(AttributeInfo::Characteristic(info)) => println!(
            "{}Characteristic {} [{}]: {}",
            indent, uuid, info.flags, node.id
        ),
        Some(AttributeInfo::Descriptor(_)) => {
            println!("{}Descriptor {}: {}", indent, uuid, node.id)
        }
        None => println!("{}{}", indent, node.id),
    }
    if let Some(value) = &node.value {
        println!("{}  {}", indent, debug_format_maybe_string(value));
    }
}

fn print_sensor(sensor: &Sensor) {
    match sensor.resolution {
        Resolution::Resolved => println!(
            "  {}: {}{} ({}){}",
            sensor.name,
            sensor
                .value
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".to_owned()),
            sensor.unit.as_deref().unwrap_or(""),
            sensor.id,
            if sensor.is_on { " [notifying]" } else { "" }
        ),
        resolution => println!("  {}: {:?}", sensor.name, resolution),
    }
}

const PRINTABLE_ASCII_RANGE: RangeInclusive<u8> = 0x20..=0x7E;

/// Guesses whether the given value might be a string, and returns it formatted either as a string
/// or as a list of numbers.
fn debug_format_maybe_string(value: &[u8]) -> String {
    // Try to parse as a string if all but the last byte are printable ASCII characters. The last
    // may be 0, as strings are often NUL-terminated.
    if value.len() > 1
        && value[0..value.len() - 1]
            .iter()
            .all(|c| PRINTABLE_ASCII_RANGE.contains(c))
    {
        match str::from_utf8(value) {
            Ok(string) => format!("{:?}", string),
            Err(_) => format!("{:?}", value),
        }
    } else {
        format!("{:?}", value)
    }
}
