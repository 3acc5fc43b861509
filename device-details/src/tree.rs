//! The attribute tree: every device, service, characteristic and descriptor discovered so far,
//! with per-node discovery and I/O state.

use gatt_client::{
    AttributeId, CharacteristicFlags, CharacteristicInfo, DescriptorInfo, DeviceId, ServiceInfo,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::DetailsError;

/// Information about a discovered attribute, as returned by the adapter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributeInfo {
    Service(ServiceInfo),
    Characteristic(CharacteristicInfo),
    Descriptor(DescriptorInfo),
}

impl AttributeInfo {
    pub fn id(&self) -> AttributeId {
        match self {
            Self::Service(info) => info.id.clone().into(),
            Self::Characteristic(info) => info.id.clone().into(),
            Self::Descriptor(info) => info.id.clone().into(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Service(info) => info.uuid,
            Self::Characteristic(info) => info.uuid,
            Self::Descriptor(info) => info.uuid,
        }
    }
}

impl From<ServiceInfo> for AttributeInfo {
    fn from(info: ServiceInfo) -> Self {
        Self::Service(info)
    }
}

impl From<CharacteristicInfo> for AttributeInfo {
    fn from(info: CharacteristicInfo) -> Self {
        Self::Characteristic(info)
    }
}

impl From<DescriptorInfo> for AttributeInfo {
    fn from(info: DescriptorInfo) -> Self {
        Self::Descriptor(info)
    }
}

/// Whether a read or write of a node's value is in flight.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IoState {
    #[default]
    Idle,
    Reading,
    Writing,
}

/// A device or attribute in the tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeNode {
    pub id: AttributeId,
    /// What the adapter reported when the node was discovered. `None` for devices.
    pub info: Option<AttributeInfo>,
    /// The name read from the GAP Device Name characteristic, for devices.
    pub name: Option<String>,
    /// The IDs of the node's children in discovery order, or `None` if they have not been
    /// discovered yet.
    pub children: Option<Vec<AttributeId>>,
    pub discovering_children: bool,
    pub expanded: bool,
    /// The value as last read, written or notified. Cleared by a failed read.
    pub value: Option<Vec<u8>>,
    /// The last value which was successfully read, written or notified.
    pub last_good_value: Option<Vec<u8>>,
    pub io: IoState,
}

impl AttributeNode {
    fn new(id: AttributeId, info: Option<AttributeInfo>) -> Self {
        Self {
            id,
            info,
            name: None,
            children: None,
            discovering_children: false,
            expanded: false,
            value: None,
            last_good_value: None,
            io: IoState::Idle,
        }
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.info.as_ref().map(AttributeInfo::uuid)
    }

    /// The characteristic's capability flags, or no flags for other kinds of node.
    pub fn flags(&self) -> CharacteristicFlags {
        match &self.info {
            Some(AttributeInfo::Characteristic(info)) => info.flags,
            _ => CharacteristicFlags::empty(),
        }
    }

    /// Whether expanding this node should start discovery of its children: it is a service or
    /// characteristic whose children are unknown, not already expanded and not being discovered.
    pub fn needs_discovery_on_expand(&self) -> bool {
        matches!(
            self.id,
            AttributeId::Service(_) | AttributeId::Characteristic(_)
        ) && self.children.is_none()
            && !self.expanded
            && !self.discovering_children
    }
}

/// The versioned store of discovered devices and attributes.
///
/// Nodes are kept in an arena keyed by ID, each owning the ordered list of its children's IDs.
/// Every mutation increments the version. Two trees are equal if they have the same contents,
/// regardless of version.
#[derive(Clone, Debug, Default)]
pub struct AttributeTree {
    nodes: HashMap<AttributeId, AttributeNode>,
    devices: Vec<DeviceId>,
    selected: Option<AttributeId>,
    version: u64,
}

impl PartialEq for AttributeTree {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
            && self.devices == other.devices
            && self.selected == other.selected
    }
}

impl Eq for AttributeTree {}

impl AttributeTree {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn node(&self, id: &AttributeId) -> Option<&AttributeNode> {
        self.nodes.get(id)
    }

    /// The currently selected node, if any.
    pub fn selected(&self) -> Option<&AttributeId> {
        self.selected.as_ref()
    }

    /// The connected devices, in the order they connected.
    pub fn devices(&self) -> impl Iterator<Item = &AttributeNode> {
        self.devices
            .iter()
            .filter_map(move |device| self.nodes.get(&device.clone().into()))
    }

    /// The children of the given node in discovery order, or `None` if the node doesn't exist or
    /// its children haven't been discovered.
    pub fn children(&self, id: &AttributeId) -> Option<Vec<&AttributeNode>> {
        let children = self.nodes.get(id)?.children.as_ref()?;
        Some(
            children
                .iter()
                .filter_map(|child| self.nodes.get(child))
                .collect(),
        )
    }

    /// The discovered children of the given node as the adapter described them.
    pub fn children_info(&self, id: &AttributeId) -> Option<Vec<AttributeInfo>> {
        Some(
            self.children(id)?
                .into_iter()
                .filter_map(|child| child.info.clone())
                .collect(),
        )
    }

    /// Find the first discovered child of the given node with the given UUID.
    pub fn find_child_by_uuid(&self, id: &AttributeId, uuid: Uuid) -> Option<&AttributeNode> {
        self.children(id)?
            .into_iter()
            .find(|child| child.uuid() == Some(uuid))
    }

    fn node_mut(&mut self, id: &AttributeId) -> Result<&mut AttributeNode, DetailsError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| DetailsError::UnknownAttribute(id.clone()))
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    /// Add a newly connected device with nothing discovered, replacing any existing node for it.
    pub fn add_device(&mut self, device: DeviceId) {
        let id = AttributeId::from(device.clone());
        self.remove_subtree(&id);
        self.nodes.insert(id.clone(), AttributeNode::new(id, None));
        if !self.devices.contains(&device) {
            self.devices.push(device);
        }
        self.bump();
    }

    /// Remove a device and everything discovered on it. Returns whether the device was present.
    pub fn remove_device(&mut self, device: &DeviceId) -> bool {
        let id = AttributeId::from(device.clone());
        let present = self.nodes.contains_key(&id);
        self.remove_subtree(&id);
        self.devices.retain(|d| d != device);
        self.bump();
        present
    }

    /// Remove every device.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.devices.clear();
        self.selected = None;
        self.bump();
    }

    fn remove_subtree(&mut self, id: &AttributeId) {
        if let Some(node) = self.nodes.remove(id) {
            for child in node.children.iter().flatten() {
                self.remove_subtree(child);
            }
        }
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
    }

    /// Mark that discovery of the given node's children has started.
    pub fn begin_discovery(&mut self, id: &AttributeId) -> Result<(), DetailsError> {
        self.node_mut(id)?.discovering_children = true;
        self.bump();
        Ok(())
    }

    /// Mark that discovery of the given node's children has finished. On success the previous
    /// children and their descendants are replaced wholesale by fresh nodes for the given
    /// children; on failure (`None`) they are left alone.
    pub fn complete_discovery(
        &mut self,
        id: &AttributeId,
        children: Option<Vec<AttributeInfo>>,
    ) -> Result<(), DetailsError> {
        let parent = self.node_mut(id)?;
        parent.discovering_children = false;
        if let Some(children) = children {
            let old_children = parent.children.replace(Vec::new()).unwrap_or_default();
            for old_child in &old_children {
                self.remove_subtree(old_child);
            }
            let mut child_ids = Vec::with_capacity(children.len());
            for child in children {
                let child_id = child.id();
                if child_id.parent().as_ref() != Some(id) {
                    log::warn!("Ignoring {} discovered under {}", child_id, id);
                    continue;
                }
                if child_ids.contains(&child_id) {
                    log::warn!("Ignoring duplicate {} discovered under {}", child_id, id);
                    continue;
                }
                self.nodes
                    .insert(child_id.clone(), AttributeNode::new(child_id.clone(), Some(child)));
                child_ids.push(child_id);
            }
            log::debug!("Discovered {} children of {}", child_ids.len(), id);
            self.node_mut(id)?.children = Some(child_ids);
        }
        self.bump();
        Ok(())
    }

    /// Flip whether the given node is expanded, returning the new state.
    pub fn toggle_expanded(&mut self, id: &AttributeId) -> Result<bool, DetailsError> {
        let node = self.node_mut(id)?;
        node.expanded = !node.expanded;
        let expanded = node.expanded;
        self.bump();
        Ok(expanded)
    }

    pub fn select(&mut self, id: Option<AttributeId>) -> Result<(), DetailsError> {
        if let Some(id) = &id {
            self.node_mut(id)?;
        }
        self.selected = id;
        self.bump();
        Ok(())
    }

    pub fn begin_read(&mut self, id: &AttributeId) -> Result<(), DetailsError> {
        self.node_mut(id)?.io = IoState::Reading;
        self.bump();
        Ok(())
    }

    /// Mark that a write has started, showing the value being written until it completes.
    pub fn begin_write(&mut self, id: &AttributeId, value: &[u8]) -> Result<(), DetailsError> {
        let node = self.node_mut(id)?;
        node.io = IoState::Writing;
        node.value = Some(value.to_vec());
        self.bump();
        Ok(())
    }

    /// Record the result of a read: the value read, or `None` if it failed.
    pub fn record_read(
        &mut self,
        id: &AttributeId,
        value: Option<Vec<u8>>,
    ) -> Result<(), DetailsError> {
        let node = self.node_mut(id)?;
        node.io = IoState::Idle;
        if value.is_some() {
            node.last_good_value = value.clone();
        }
        node.value = value;
        self.bump();
        Ok(())
    }

    /// Record the result of a write: the value written, or `None` if it failed, in which case the
    /// last known good value is restored.
    pub fn record_write(
        &mut self,
        id: &AttributeId,
        value: Option<Vec<u8>>,
    ) -> Result<(), DetailsError> {
        let node = self.node_mut(id)?;
        node.io = IoState::Idle;
        match value {
            Some(value) => {
                node.last_good_value = Some(value.clone());
                node.value = Some(value);
            }
            None => node.value = node.last_good_value.clone(),
        }
        self.bump();
        Ok(())
    }

    /// Record a value reported by the device outside of a read, such as a notification.
    pub fn record_value_changed(
        &mut self,
        id: &AttributeId,
        value: Vec<u8>,
    ) -> Result<(), DetailsError> {
        let node = self.node_mut(id)?;
        node.last_good_value = Some(value.clone());
        node.value = Some(value);
        self.bump();
        Ok(())
    }

    pub fn set_device_name(&mut self, device: &DeviceId, name: String) -> Result<(), DetailsError> {
        self.node_mut(&device.clone().into())?.name = Some(name);
        self.bump();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatt_client::{uuid_from_u16, CharacteristicId, ServiceId};

    fn device() -> DeviceId {
        DeviceId::new("dev0").unwrap()
    }

    fn service(handle: u16, uuid: u16) -> AttributeInfo {
        ServiceInfo {
            id: device().service(handle),
            uuid: uuid_from_u16(uuid),
            primary: true,
        }
        .into()
    }

    fn characteristic(service: &ServiceId, handle: u16, flags: CharacteristicFlags) -> AttributeInfo {
        CharacteristicInfo {
            id: service.characteristic(handle),
            uuid: uuid_from_u16(0x2a00 + handle),
            flags,
        }
        .into()
    }

    fn descriptor(characteristic: &CharacteristicId, handle: u16) -> AttributeInfo {
        DescriptorInfo {
            id: characteristic.descriptor(handle),
            uuid: uuid_from_u16(0x2902),
        }
        .into()
    }

    fn tree_with_device() -> AttributeTree {
        let mut tree = AttributeTree::default();
        tree.add_device(device());
        tree
    }

    #[test]
    fn discovery_marks_and_installs() {
        let mut tree = tree_with_device();
        let id = AttributeId::from(device());
        tree.begin_discovery(&id).unwrap();
        assert!(tree.node(&id).unwrap().discovering_children);

        tree.complete_discovery(&id, Some(vec![service(1, 0x1800), service(5, 0x180f)]))
            .unwrap();
        let node = tree.node(&id).unwrap();
        assert!(!node.discovering_children);
        assert_eq!(
            node.children,
            Some(vec![
                device().service(1).into(),
                device().service(5).into()
            ])
        );
        let found = tree.find_child_by_uuid(&id, uuid_from_u16(0x180f)).unwrap();
        assert_eq!(found.id, AttributeId::from(device().service(5)));
        assert_eq!(found.children, None);
    }

    #[test]
    fn empty_children_differ_from_undiscovered() {
        let mut tree = tree_with_device();
        let id = AttributeId::from(device());
        assert_eq!(tree.children(&id), None);
        tree.complete_discovery(&id, Some(vec![])).unwrap();
        assert_eq!(tree.children(&id), Some(vec![]));
    }

    #[test]
    fn complete_twice_equals_once() {
        let id = AttributeId::from(device());
        let children = vec![service(1, 0x1800), service(5, 0x180f)];

        let mut once = tree_with_device();
        once.complete_discovery(&id, Some(children.clone())).unwrap();
        let mut twice = once.clone();
        twice.complete_discovery(&id, Some(children)).unwrap();

        assert_eq!(once, twice);
        assert!(twice.version() > once.version());
    }

    #[test]
    fn rediscovery_drops_descendants() {
        let mut tree = tree_with_device();
        let device_id = AttributeId::from(device());
        let service_id = device().service(1);
        tree.complete_discovery(&device_id, Some(vec![service(1, 0x1800)]))
            .unwrap();
        tree.complete_discovery(
            &service_id.clone().into(),
            Some(vec![characteristic(&service_id, 2, CharacteristicFlags::READ)]),
        )
        .unwrap();
        let characteristic_id = AttributeId::from(service_id.characteristic(2));
        assert!(tree.node(&characteristic_id).is_some());

        tree.complete_discovery(&device_id, Some(vec![service(1, 0x1800)]))
            .unwrap();
        assert!(tree.node(&characteristic_id).is_none());
        assert_eq!(tree.node(&service_id.into()).unwrap().children, None);
    }

    #[test]
    fn failed_discovery_keeps_children() {
        let mut tree = tree_with_device();
        let id = AttributeId::from(device());
        tree.complete_discovery(&id, Some(vec![service(1, 0x1800)]))
            .unwrap();
        tree.begin_discovery(&id).unwrap();
        tree.complete_discovery(&id, None).unwrap();
        let node = tree.node(&id).unwrap();
        assert!(!node.discovering_children);
        assert_eq!(node.children, Some(vec![device().service(1).into()]));
    }

    #[test]
    fn children_with_wrong_parent_are_skipped() {
        let mut tree = tree_with_device();
        let service_id = device().service(1);
        tree.complete_discovery(&device().into(), Some(vec![service(1, 0x1800)]))
            .unwrap();
        let other_service = device().service(9);
        tree.complete_discovery(
            &service_id.clone().into(),
            Some(vec![
                characteristic(&other_service, 10, CharacteristicFlags::READ),
                characteristic(&service_id, 2, CharacteristicFlags::READ),
            ]),
        )
        .unwrap();
        assert_eq!(
            tree.node(&service_id.clone().into()).unwrap().children,
            Some(vec![service_id.characteristic(2).into()])
        );
    }

    #[test]
    fn failed_write_restores_last_good_value() {
        let mut tree = tree_with_device();
        let service_id = device().service(1);
        let characteristic_id = AttributeId::from(service_id.characteristic(2));
        tree.complete_discovery(&device().into(), Some(vec![service(1, 0x1800)]))
            .unwrap();
        tree.complete_discovery(
            &service_id.clone().into(),
            Some(vec![characteristic(&service_id, 2, CharacteristicFlags::WRITE)]),
        )
        .unwrap();
        tree.begin_read(&characteristic_id).unwrap();
        tree.record_read(&characteristic_id, Some(vec![1, 2])).unwrap();

        tree.begin_write(&characteristic_id, &[3]).unwrap();
        let node = tree.node(&characteristic_id).unwrap();
        assert_eq!(node.io, IoState::Writing);
        assert_eq!(node.value, Some(vec![3]));

        tree.record_write(&characteristic_id, None).unwrap();
        let node = tree.node(&characteristic_id).unwrap();
        assert_eq!(node.io, IoState::Idle);
        assert_eq!(node.value, Some(vec![1, 2]));
    }

    #[test]
    fn failed_read_clears_value() {
        let mut tree = tree_with_device();
        let service_id = device().service(1);
        let characteristic_id = service_id.characteristic(2);
        let descriptor_id = AttributeId::from(characteristic_id.descriptor(3));
        tree.complete_discovery(&device().into(), Some(vec![service(1, 0x1800)]))
            .unwrap();
        tree.complete_discovery(
            &service_id.clone().into(),
            Some(vec![characteristic(&service_id, 2, CharacteristicFlags::READ)]),
        )
        .unwrap();
        tree.complete_discovery(
            &characteristic_id.clone().into(),
            Some(vec![descriptor(&characteristic_id, 3)]),
        )
        .unwrap();
        tree.record_value_changed(&descriptor_id, vec![1, 0]).unwrap();
        tree.record_read(&descriptor_id, None).unwrap();
        let node = tree.node(&descriptor_id).unwrap();
        assert_eq!(node.value, None);
        assert_eq!(node.last_good_value, Some(vec![1, 0]));
    }

    #[test]
    fn expand_guard() {
        let mut tree = tree_with_device();
        let service_id = AttributeId::from(device().service(1));
        tree.complete_discovery(&device().into(), Some(vec![service(1, 0x1800)]))
            .unwrap();
        assert!(tree.node(&service_id).unwrap().needs_discovery_on_expand());
        tree.begin_discovery(&service_id).unwrap();
        assert!(!tree.node(&service_id).unwrap().needs_discovery_on_expand());
        tree.complete_discovery(&service_id, Some(vec![])).unwrap();
        assert!(!tree.node(&service_id).unwrap().needs_discovery_on_expand());
        assert!(!tree
            .node(&device().into())
            .unwrap()
            .needs_discovery_on_expand());
    }

    #[test]
    fn remove_device_drops_subtree_and_selection() {
        let mut tree = tree_with_device();
        let service_id = AttributeId::from(device().service(1));
        tree.complete_discovery(&device().into(), Some(vec![service(1, 0x1800)]))
            .unwrap();
        tree.select(Some(service_id.clone())).unwrap();
        assert!(tree.remove_device(&device()));
        assert!(tree.node(&service_id).is_none());
        assert_eq!(tree.selected(), None);
        assert_eq!(tree.devices().count(), 0);
        assert!(!tree.remove_device(&device()));
    }

    #[test]
    fn missing_node_is_error() {
        let mut tree = AttributeTree::default();
        let id = AttributeId::from(device());
        assert_eq!(
            tree.begin_discovery(&id),
            Err(DetailsError::UnknownAttribute(id.clone()))
        );
        assert_eq!(
            tree.select(Some(id.clone())),
            Err(DetailsError::UnknownAttribute(id))
        );
    }
}
