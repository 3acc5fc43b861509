//! `device-details` keeps track of the devices connected through a Bluetooth Low Energy adapter and
//! lazily discovers their GATT attribute trees, reads and writes attribute values, and projects
//! named sensors from a device profile onto the discovered tree.
//!
//! [`DeviceDetails`] owns the [`AttributeTree`] and drives the adapter. Every state transition and
//! every error is published on the event stream returned by [`DeviceDetails::new`].

mod decode;
mod error;
mod profile;
mod sensor;
mod tree;

pub use decode::{DecodeError, SensorValue, ValueFormat};
pub use error::DetailsError;
pub use profile::{DeviceDefinition, ProfileError, SensorDefinition};
pub use sensor::{Resolution, Sensor, SensorProjection};
pub use tree::{AttributeInfo, AttributeNode, AttributeTree, IoState};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use gatt_client::{
    uuid_from_u16, AdapterId, AttributeId, BleAdapter, BluetoothError, CharacteristicId,
    DescriptorId, DeviceId, ServiceId, ServiceInfo, WriteType,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

/// The Generic Access Profile service.
pub const GAP_SERVICE_UUID: Uuid = uuid_from_u16(0x1800);
/// The GAP Device Name characteristic.
pub const DEVICE_NAME_UUID: Uuid = uuid_from_u16(0x2a00);

/// A change to the attribute tree or adapter selection, or an error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    AdapterSelected(AdapterId),
    AdapterClosed(AdapterId),
    DeviceConnected(DeviceId),
    DeviceDisconnected(DeviceId),
    /// Discovery of the children of the node has started.
    Discovering(AttributeId),
    /// The children of the node have been discovered.
    Discovered {
        id: AttributeId,
        children: Vec<AttributeId>,
    },
    NameDiscovered {
        device: DeviceId,
        name: String,
    },
    ExpandedToggled {
        id: AttributeId,
        expanded: bool,
    },
    Selected(Option<AttributeId>),
    Reading(AttributeId),
    Writing {
        id: AttributeId,
        value: Vec<u8>,
    },
    Read {
        id: AttributeId,
        value: Vec<u8>,
    },
    Written {
        id: AttributeId,
        value: Vec<u8>,
    },
    /// The device reported a new value outside of a read, e.g. in a notification.
    ValueChanged {
        id: AttributeId,
        value: Vec<u8>,
    },
    Error(DetailsError),
}

type DiscoveryResult = Result<Vec<AttributeInfo>, DetailsError>;

/// The outcome of a discovery in flight, `None` until it finishes.
type PendingDiscovery = watch::Receiver<Option<DiscoveryResult>>;

/// How a call gets the children of a node.
enum Discovery {
    Cached(Vec<AttributeInfo>),
    /// Another call is already discovering them.
    Pending(PendingDiscovery),
    /// This call must discover them, and publish the result to any others which wait for it.
    Started(watch::Sender<Option<DiscoveryResult>>),
}

/// The attribute tree of the devices connected through the selected adapter, and the operations
/// which discover it and read and write its values.
///
/// The tree lock is never held while waiting for the adapter, so operations may run concurrently.
/// Each operation uses the adapter which was selected when it started, even if another adapter is
/// selected before it finishes.
#[derive(Debug)]
pub struct DeviceDetails {
    adapter: RwLock<Option<Arc<dyn BleAdapter>>>,
    tree: Mutex<AttributeTree>,
    /// Discoveries in flight, by the node whose children are being discovered. Only locked while
    /// the tree is locked.
    discoveries: Mutex<HashMap<AttributeId, PendingDiscovery>>,
    events: UnboundedSender<Event>,
}

impl DeviceDetails {
    /// Create a new `DeviceDetails` with no adapter selected, and the stream of events it
    /// publishes.
    pub fn new() -> (Self, UnboundedReceiver<Event>) {
        let (events, receiver) = unbounded();
        let details = Self {
            adapter: RwLock::new(None),
            tree: Mutex::new(AttributeTree::default()),
            discoveries: Mutex::new(HashMap::new()),
            events,
        };
        (details, receiver)
    }

    fn emit(&self, event: Event) {
        if self.events.unbounded_send(event).is_err() {
            log::trace!("Event receiver dropped");
        }
    }

    /// Log the error and publish it on the event stream, then give it back.
    pub(crate) fn report(&self, error: DetailsError) -> DetailsError {
        log::warn!("{}", error);
        self.emit(Event::Error(error.clone()));
        error
    }

    async fn adapter(&self) -> Result<Arc<dyn BleAdapter>, DetailsError> {
        self.adapter
            .read()
            .await
            .clone()
            .ok_or(DetailsError::NoAdapterSelected)
    }

    /// Use the given adapter for all subsequent operations.
    pub async fn select_adapter(&self, adapter: Arc<dyn BleAdapter>) {
        let id = adapter.id();
        if let Some(old) = self.adapter.write().await.replace(adapter) {
            log::debug!("Replacing adapter {}", old.id());
        }
        log::info!("Selected adapter {}", id);
        self.emit(Event::AdapterSelected(id));
    }

    /// Stop using the selected adapter, and forget every device connected through it.
    pub async fn close_adapter(&self) {
        let closed = self.adapter.write().await.take();
        if let Some(adapter) = closed {
            self.tree.lock().await.clear();
            let id = adapter.id();
            log::info!("Closed adapter {}", id);
            self.emit(Event::AdapterClosed(id));
        }
    }

    /// A copy of the current attribute tree.
    pub async fn snapshot(&self) -> AttributeTree {
        self.tree.lock().await.clone()
    }

    /// The version of the attribute tree, which changes whenever anything in it does.
    pub async fn version(&self) -> u64 {
        self.tree.lock().await.version()
    }

    /// Add a newly connected device, with nothing discovered.
    pub async fn device_connected(&self, device: DeviceId) {
        self.tree.lock().await.add_device(device.clone());
        log::info!("Device {} connected", device);
        self.emit(Event::DeviceConnected(device));
    }

    /// Drop a disconnected device and everything discovered on it. Operations still in flight
    /// for it will have no effect when they complete.
    pub async fn device_disconnected(&self, device: &DeviceId) {
        if self.tree.lock().await.remove_device(device) {
            log::info!("Device {} disconnected", device);
            self.emit(Event::DeviceDisconnected(device.clone()));
        } else {
            log::debug!("Unknown device {} disconnected", device);
        }
    }

    /// Select the given node, or nothing.
    pub async fn select_attribute(&self, id: Option<AttributeId>) -> Result<(), DetailsError> {
        self.tree
            .lock()
            .await
            .select(id.clone())
            .map_err(|e| self.report(e))?;
        self.emit(Event::Selected(id));
        Ok(())
    }

    /// Expand or collapse the given node and select it. Expanding a service or characteristic
    /// whose children have never been discovered, and aren't being discovered, discovers them.
    ///
    /// Returns whether the node is now expanded.
    pub async fn toggle_attribute_expanded(&self, id: &AttributeId) -> Result<bool, DetailsError> {
        self.try_toggle_attribute_expanded(id)
            .await
            .map_err(|e| self.report(e))
    }

    async fn try_toggle_attribute_expanded(&self, id: &AttributeId) -> Result<bool, DetailsError> {
        let adapter = self.adapter().await?;
        let (expanded, discovery) = {
            let mut tree = self.tree.lock().await;
            let node = tree
                .node(id)
                .ok_or_else(|| DetailsError::UnknownAttribute(id.clone()))?;
            let discovery = if node.needs_discovery_on_expand() {
                Some(start_discovery(
                    &mut tree,
                    &mut *self.discoveries.lock().await,
                    id,
                )?)
            } else {
                None
            };
            let expanded = tree.toggle_expanded(id)?;
            tree.select(Some(id.clone()))?;
            (expanded, discovery)
        };
        log::debug!("Toggled {} expanded to {}", id, expanded);
        self.emit(Event::ExpandedToggled {
            id: id.clone(),
            expanded,
        });
        self.emit(Event::Selected(Some(id.clone())));
        if let Some(discovery) = discovery {
            self.run_discovery(adapter.as_ref(), id, discovery).await?;
        }
        Ok(expanded)
    }

    /// Discover the services of the given device, replacing any discovered before.
    pub async fn discover_services(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        self.discover_children(&device.clone().into()).await
    }

    /// Discover the characteristics of the given service, replacing any discovered before.
    pub async fn discover_characteristics(
        &self,
        service: &ServiceId,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        self.discover_children(&service.clone().into()).await
    }

    /// Discover the descriptors of the given characteristic, replacing any discovered before.
    pub async fn discover_descriptors(
        &self,
        characteristic: &CharacteristicId,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        self.discover_children(&characteristic.clone().into()).await
    }

    async fn discover_children(&self, id: &AttributeId) -> Result<Vec<AttributeInfo>, DetailsError> {
        async {
            let adapter = self.adapter().await?;
            self.try_discover_children(adapter.as_ref(), id).await
        }
        .await
        .map_err(|e| self.report(e))
    }

    /// The children of the given node, discovering them first if that has never been done.
    pub async fn children_or_discover(
        &self,
        id: &AttributeId,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        async {
            let adapter = self.adapter().await?;
            self.try_children_or_discover(adapter.as_ref(), id).await
        }
        .await
        .map_err(|e| self.report(e))
    }

    async fn try_children_or_discover(
        &self,
        adapter: &dyn BleAdapter,
        id: &AttributeId,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        let discovery = {
            let mut tree = self.tree.lock().await;
            match tree.children_info(id) {
                Some(children) => Discovery::Cached(children),
                None => start_discovery(&mut tree, &mut *self.discoveries.lock().await, id)?,
            }
        };
        self.run_discovery(adapter, id, discovery).await
    }

    async fn try_discover_children(
        &self,
        adapter: &dyn BleAdapter,
        id: &AttributeId,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        let discovery = start_discovery(
            &mut *self.tree.lock().await,
            &mut *self.discoveries.lock().await,
            id,
        )?;
        self.run_discovery(adapter, id, discovery).await
    }

    async fn run_discovery(
        &self,
        adapter: &dyn BleAdapter,
        id: &AttributeId,
        discovery: Discovery,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        match discovery {
            Discovery::Cached(children) => Ok(children),
            Discovery::Pending(mut pending) => {
                log::debug!("Waiting for discovery of children of {} in flight", id);
                let result = pending
                    .wait_for(Option::is_some)
                    .await
                    .map(|result| (*result).clone());
                match result {
                    Ok(Some(result)) => result,
                    _ => Err(DetailsError::DiscoveryFailed {
                        id: id.clone(),
                        source: BluetoothError::Adapter("Discovery abandoned".to_string()),
                    }),
                }
            }
            Discovery::Started(sender) => {
                self.emit(Event::Discovering(id.clone()));
                let result = self.finish_discovery(adapter, id, &sender).await;
                sender.send_replace(Some(result.clone()));
                result
            }
        }
    }

    /// Make the discovery call for a node which has already been marked as discovering, and
    /// record the result unless the node was removed or rediscovered in the meantime.
    async fn finish_discovery(
        &self,
        adapter: &dyn BleAdapter,
        id: &AttributeId,
        sender: &watch::Sender<Option<DiscoveryResult>>,
    ) -> Result<Vec<AttributeInfo>, DetailsError> {
        log::trace!("Discovering children of {} on {}", id, adapter.id());
        let result = fetch_children(adapter, id).await;
        let recorded = {
            let mut tree = self.tree.lock().await;
            let mut discoveries = self.discoveries.lock().await;
            let current = discoveries
                .get(id)
                .map_or(false, |pending| pending.same_channel(&sender.subscribe()));
            if current {
                discoveries.remove(id);
                tree.complete_discovery(id, result.as_ref().ok().cloned())
                    .is_ok()
            } else {
                false
            }
        };
        match result {
            Ok(children) => {
                if recorded {
                    self.emit(Event::Discovered {
                        id: id.clone(),
                        children: children.iter().map(AttributeInfo::id).collect(),
                    });
                } else {
                    log::debug!("Discovered children of {} after it was removed", id);
                }
                Ok(children)
            }
            Err(source) => Err(DetailsError::DiscoveryFailed {
                id: id.clone(),
                source,
            }),
        }
    }

    /// Discover the services of the given device, then its name.
    pub async fn discover_device(&self, device: &DeviceId) -> Result<String, DetailsError> {
        async {
            let adapter = self.adapter().await?;
            self.try_discover_children(adapter.as_ref(), &device.clone().into())
                .await?;
            self.try_discover_device_name(adapter.as_ref(), device).await
        }
        .await
        .map_err(|e| self.report(e))
    }

    /// Find the device's name by reading the Device Name characteristic of its GAP service,
    /// discovering whichever of them hasn't been discovered yet. The name is stored on the
    /// device node.
    pub async fn discover_device_name(&self, device: &DeviceId) -> Result<String, DetailsError> {
        async {
            let adapter = self.adapter().await?;
            self.try_discover_device_name(adapter.as_ref(), device)
                .await
        }
        .await
        .map_err(|e| self.report(e))
    }

    async fn try_discover_device_name(
        &self,
        adapter: &dyn BleAdapter,
        device: &DeviceId,
    ) -> Result<String, DetailsError> {
        let device_id = AttributeId::from(device.clone());
        let services = self.try_children_or_discover(adapter, &device_id).await?;
        let gap = services
            .into_iter()
            .find_map(|info| match info {
                AttributeInfo::Service(service) if service.uuid == GAP_SERVICE_UUID => {
                    Some(service)
                }
                _ => None,
            })
            .ok_or_else(|| DetailsError::AttributeNotFound {
                parent: device_id.clone(),
                uuid: GAP_SERVICE_UUID,
            })?;
        let ServiceInfo { id: gap_id, .. } = gap;
        let gap_id = AttributeId::from(gap_id);

        let characteristics = self.try_children_or_discover(adapter, &gap_id).await?;
        let name_characteristic = characteristics
            .into_iter()
            .find_map(|info| match info {
                AttributeInfo::Characteristic(characteristic)
                    if characteristic.uuid == DEVICE_NAME_UUID =>
                {
                    Some(characteristic.id)
                }
                _ => None,
            })
            .ok_or(DetailsError::AttributeNotFound {
                parent: gap_id,
                uuid: DEVICE_NAME_UUID,
            })?;

        let value = self
            .try_read(adapter, &name_characteristic.into())
            .await?;
        let name = String::from_utf8_lossy(&value)
            .trim_end_matches('\0')
            .to_owned();
        match self
            .tree
            .lock()
            .await
            .set_device_name(device, name.clone())
        {
            Ok(()) => {
                log::info!("Device {} is named {:?}", device, name);
                self.emit(Event::NameDiscovered {
                    device: device.clone(),
                    name: name.clone(),
                });
            }
            Err(_) => log::debug!("Found name of {} after it disconnected", device),
        }
        Ok(name)
    }

    /// Read the value of the given characteristic.
    pub async fn read_characteristic(
        &self,
        id: &CharacteristicId,
    ) -> Result<Vec<u8>, DetailsError> {
        self.read(id.clone().into()).await
    }

    /// Read the value of the given descriptor.
    pub async fn read_descriptor(&self, id: &DescriptorId) -> Result<Vec<u8>, DetailsError> {
        self.read(id.clone().into()).await
    }

    async fn read(&self, id: AttributeId) -> Result<Vec<u8>, DetailsError> {
        async {
            let adapter = self.adapter().await?;
            self.try_read(adapter.as_ref(), &id).await
        }
        .await
        .map_err(|e| self.report(e))
    }

    async fn try_read(
        &self,
        adapter: &dyn BleAdapter,
        id: &AttributeId,
    ) -> Result<Vec<u8>, DetailsError> {
        self.tree.lock().await.begin_read(id)?;
        self.emit(Event::Reading(id.clone()));
        log::trace!("Reading {} on {}", id, adapter.id());
        let result = read_value(adapter, id).await;
        let recorded = self
            .tree
            .lock()
            .await
            .record_read(id, result.as_ref().ok().cloned());
        if recorded.is_err() {
            log::debug!("Read of {} completed after it was removed", id);
        }
        match result {
            Ok(value) => {
                if recorded.is_ok() {
                    self.emit(Event::Read {
                        id: id.clone(),
                        value: value.clone(),
                    });
                }
                Ok(value)
            }
            Err(source) => Err(DetailsError::ReadFailed {
                id: id.clone(),
                source,
            }),
        }
    }

    /// Write the given value to the given characteristic, as a request if the characteristic
    /// supports that, otherwise as a command if it supports that, otherwise as a request.
    pub async fn write_characteristic(
        &self,
        id: &CharacteristicId,
        value: Vec<u8>,
    ) -> Result<(), DetailsError> {
        self.write(id.clone().into(), value).await
    }

    /// Write the given value to the given descriptor, as a request.
    pub async fn write_descriptor(
        &self,
        id: &DescriptorId,
        value: Vec<u8>,
    ) -> Result<(), DetailsError> {
        self.write(id.clone().into(), value).await
    }

    async fn write(&self, id: AttributeId, value: Vec<u8>) -> Result<(), DetailsError> {
        async {
            let adapter = self.adapter().await?;
            self.try_write(adapter.as_ref(), &id, value).await
        }
        .await
        .map_err(|e| self.report(e))
    }

    async fn try_write(
        &self,
        adapter: &dyn BleAdapter,
        id: &AttributeId,
        value: Vec<u8>,
    ) -> Result<(), DetailsError> {
        let write_type = {
            let mut tree = self.tree.lock().await;
            let node = tree
                .node(id)
                .ok_or_else(|| DetailsError::UnknownAttribute(id.clone()))?;
            let write_type = match id {
                AttributeId::Characteristic(_) => WriteType::for_flags(node.flags()),
                _ => WriteType::WithResponse,
            };
            tree.begin_write(id, &value)?;
            write_type
        };
        self.emit(Event::Writing {
            id: id.clone(),
            value: value.clone(),
        });
        log::trace!("Writing {:?} to {} as {} on {}", value, id, write_type, adapter.id());
        let result = write_value(adapter, id, &value, write_type).await;
        let recorded = self
            .tree
            .lock()
            .await
            .record_write(id, result.is_ok().then(|| value.clone()));
        if recorded.is_err() {
            log::debug!("Write of {} completed after it was removed", id);
        }
        match result {
            Ok(()) => {
                if recorded.is_ok() {
                    self.emit(Event::Written {
                        id: id.clone(),
                        value,
                    });
                }
                Ok(())
            }
            Err(source) => Err(DetailsError::WriteFailed {
                id: id.clone(),
                source,
            }),
        }
    }

    /// Record a value which the device reported outside of a read, such as in a notification.
    /// Values for attributes which aren't in the tree are ignored.
    pub async fn handle_value_changed(&self, id: AttributeId, value: Vec<u8>) {
        let recorded = self
            .tree
            .lock()
            .await
            .record_value_changed(&id, value.clone());
        match recorded {
            Ok(()) => self.emit(Event::ValueChanged { id, value }),
            Err(_) => log::debug!("Ignoring value {:?} for unknown attribute {}", value, id),
        }
    }
}

/// Mark the node as discovering its children and register the discovery, or join the discovery
/// already in flight for it.
fn start_discovery(
    tree: &mut AttributeTree,
    discoveries: &mut HashMap<AttributeId, PendingDiscovery>,
    id: &AttributeId,
) -> Result<Discovery, DetailsError> {
    let node = tree
        .node(id)
        .ok_or_else(|| DetailsError::UnknownAttribute(id.clone()))?;
    if node.discovering_children {
        // A closed channel means the call which started it was dropped.
        if let Some(pending) = discoveries.get(id).filter(|p| p.has_changed().is_ok()) {
            return Ok(Discovery::Pending(pending.clone()));
        }
    }
    tree.begin_discovery(id)?;
    let (sender, pending) = watch::channel(None);
    discoveries.insert(id.clone(), pending);
    Ok(Discovery::Started(sender))
}

async fn fetch_children(
    adapter: &dyn BleAdapter,
    id: &AttributeId,
) -> Result<Vec<AttributeInfo>, BluetoothError> {
    Ok(match id {
        AttributeId::Device(device) => adapter
            .get_services(device)
            .await?
            .into_iter()
            .map(Into::into)
            .collect(),
        AttributeId::Service(service) => adapter
            .get_characteristics(service)
            .await?
            .into_iter()
            .map(Into::into)
            .collect(),
        AttributeId::Characteristic(characteristic) => adapter
            .get_descriptors(characteristic)
            .await?
            .into_iter()
            .map(Into::into)
            .collect(),
        AttributeId::Descriptor(_) => Vec::new(),
    })
}

async fn read_value(adapter: &dyn BleAdapter, id: &AttributeId) -> Result<Vec<u8>, BluetoothError> {
    match id {
        AttributeId::Characteristic(characteristic) => {
            adapter.read_characteristic_value(characteristic).await
        }
        AttributeId::Descriptor(descriptor) => adapter.read_descriptor_value(descriptor).await,
        _ => Err(BluetoothError::UnknownAttribute(id.clone())),
    }
}

async fn write_value(
    adapter: &dyn BleAdapter,
    id: &AttributeId,
    value: &[u8],
    write_type: WriteType,
) -> Result<(), BluetoothError> {
    match id {
        AttributeId::Characteristic(characteristic) => {
            adapter
                .write_characteristic_value(characteristic, value, write_type)
                .await
        }
        AttributeId::Descriptor(descriptor) => {
            adapter
                .write_descriptor_value(descriptor, value, write_type)
                .await
        }
        _ => Err(BluetoothError::UnknownAttribute(id.clone())),
    }
}
