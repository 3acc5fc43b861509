use device_details::{DetailsError, DeviceDetails, Event, IoState};
use futures::channel::mpsc::UnboundedReceiver;
use gatt_client::{
    uuid_from_u16, AttributeId, BluetoothError, CharacteristicFlags, CharacteristicId, DeviceId,
    Operation, SimulatedAdapter, WriteType, CCCD_UUID,
};
use std::sync::Arc;

fn errors(events: &mut UnboundedReceiver<Event>) -> Vec<DetailsError> {
    let mut errors = Vec::new();
    while let Ok(Some(event)) = events.try_next() {
        if let Event::Error(error) = event {
            errors.push(error);
        }
    }
    errors
}

struct Peripheral {
    adapter: Arc<SimulatedAdapter>,
    details: DeviceDetails,
    events: UnboundedReceiver<Event>,
    /// Readable, and writable both with and without response.
    control: CharacteristicId,
    /// Writable only without response.
    command: CharacteristicId,
    /// Readable only.
    status: CharacteristicId,
}

/// Set up a device with one service of three characteristics, and discover everything on it.
async fn discovered_peripheral() -> Peripheral {
    let _ = pretty_env_logger::try_init();
    let adapter = Arc::new(SimulatedAdapter::new("sim0"));
    let device = DeviceId::new("dev0").unwrap();
    let service = adapter.add_service(&device, 16, uuid_from_u16(0xfff0)).await;
    let control = adapter
        .add_characteristic(
            &service,
            17,
            uuid_from_u16(0xfff1),
            CharacteristicFlags::READ
                | CharacteristicFlags::WRITE
                | CharacteristicFlags::WRITE_WITHOUT_RESPONSE,
            Some(vec![5]),
        )
        .await;
    adapter
        .add_descriptor(&control, 18, CCCD_UUID, Some(vec![0, 0]))
        .await;
    let command = adapter
        .add_characteristic(
            &service,
            19,
            uuid_from_u16(0xfff2),
            CharacteristicFlags::WRITE_WITHOUT_RESPONSE,
            None,
        )
        .await;
    let status = adapter
        .add_characteristic(
            &service,
            20,
            uuid_from_u16(0xfff3),
            CharacteristicFlags::READ,
            Some(vec![1, 2, 3]),
        )
        .await;

    let (details, mut events) = DeviceDetails::new();
    details.select_adapter(adapter.clone()).await;
    details.device_connected(device.clone()).await;
    details.discover_services(&device).await.unwrap();
    details.discover_characteristics(&service).await.unwrap();
    details.discover_descriptors(&control).await.unwrap();
    assert_eq!(errors(&mut events), vec![]);

    Peripheral {
        adapter,
        details,
        events,
        control,
        command,
        status,
    }
}

#[tokio::test]
async fn read_records_value() {
    let mut p = discovered_peripheral().await;
    assert_eq!(
        p.details.read_characteristic(&p.status).await,
        Ok(vec![1, 2, 3])
    );
    let tree = p.details.snapshot().await;
    let node = tree.node(&p.status.clone().into()).unwrap();
    assert_eq!(node.value, Some(vec![1, 2, 3]));
    assert_eq!(node.io, IoState::Idle);
    assert_eq!(errors(&mut p.events), vec![]);
}

#[tokio::test]
async fn read_in_flight() {
    let p = discovered_peripheral().await;
    let id = AttributeId::from(p.status.clone());
    let (value, io) = futures::join!(p.details.read_characteristic(&p.status), async {
        p.details.snapshot().await.node(&id).unwrap().io
    });
    assert_eq!(io, IoState::Reading);
    assert_eq!(value, Ok(vec![1, 2, 3]));
}

#[tokio::test]
async fn failed_read_clears_value() {
    let mut p = discovered_peripheral().await;
    p.details.read_characteristic(&p.status).await.unwrap();
    p.adapter
        .fail(Operation::ReadCharacteristic, "Read not permitted")
        .await;

    let id = AttributeId::from(p.status.clone());
    let expected = DetailsError::ReadFailed {
        id: id.clone(),
        source: BluetoothError::Adapter("Read not permitted".to_string()),
    };
    assert_eq!(
        p.details.read_characteristic(&p.status).await,
        Err(expected.clone())
    );
    let tree = p.details.snapshot().await;
    let node = tree.node(&id).unwrap();
    assert_eq!(node.value, None);
    assert_eq!(node.io, IoState::Idle);
    assert_eq!(node.flags(), CharacteristicFlags::READ);
    assert_eq!(errors(&mut p.events), vec![expected]);
}

#[tokio::test]
async fn failed_write_restores_value() {
    let mut p = discovered_peripheral().await;
    p.details.read_characteristic(&p.control).await.unwrap();
    p.adapter
        .fail(Operation::WriteCharacteristic, "Write not permitted")
        .await;

    let id = AttributeId::from(p.control.clone());
    let (result, during) = futures::join!(p.details.write_characteristic(&p.control, vec![9]), async {
        p.details.snapshot().await.node(&id).unwrap().value.clone()
    });
    assert_eq!(during, Some(vec![9]));
    assert_eq!(
        result,
        Err(DetailsError::WriteFailed {
            id: id.clone(),
            source: BluetoothError::Adapter("Write not permitted".to_string()),
        })
    );
    let tree = p.details.snapshot().await;
    assert_eq!(tree.node(&id).unwrap().value, Some(vec![5]));
    assert_eq!(p.adapter.value(&id).await, Some(vec![5]));
    assert_eq!(errors(&mut p.events).len(), 1);
}

#[tokio::test]
async fn write_records_value() {
    let mut p = discovered_peripheral().await;
    p.details
        .write_characteristic(&p.control, vec![7, 8])
        .await
        .unwrap();
    let id = AttributeId::from(p.control.clone());
    let tree = p.details.snapshot().await;
    let node = tree.node(&id).unwrap();
    assert_eq!(node.value, Some(vec![7, 8]));
    assert_eq!(node.last_good_value, Some(vec![7, 8]));
    assert_eq!(p.adapter.value(&id).await, Some(vec![7, 8]));
    assert_eq!(errors(&mut p.events), vec![]);
}

#[tokio::test]
async fn write_type_follows_flags() {
    let p = discovered_peripheral().await;
    p.details
        .write_characteristic(&p.control, vec![1])
        .await
        .unwrap();
    p.details
        .write_characteristic(&p.command, vec![2])
        .await
        .unwrap();
    p.details
        .write_characteristic(&p.status, vec![3])
        .await
        .unwrap();
    let write_types: Vec<_> = p
        .adapter
        .calls_to(Operation::WriteCharacteristic)
        .await
        .into_iter()
        .map(|call| call.write_type)
        .collect();
    assert_eq!(
        write_types,
        vec![
            Some(WriteType::WithResponse),
            Some(WriteType::WithoutResponse),
            Some(WriteType::WithResponse),
        ]
    );
}

#[tokio::test]
async fn descriptor_writes_are_requests() {
    let p = discovered_peripheral().await;
    let cccd = p.control.descriptor(18);
    p.details
        .write_descriptor(&cccd, vec![1, 0])
        .await
        .unwrap();
    assert_eq!(p.details.read_descriptor(&cccd).await, Ok(vec![1, 0]));
    let calls = p.adapter.calls_to(Operation::WriteDescriptor).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].write_type, Some(WriteType::WithResponse));
    assert_eq!(calls[0].value, Some(vec![1, 0]));
}

#[tokio::test]
async fn undiscovered_attribute_is_not_read() {
    let mut p = discovered_peripheral().await;
    let cccd = p.command.descriptor(25);
    let id = AttributeId::from(cccd.clone());
    assert_eq!(
        p.details.read_descriptor(&cccd).await,
        Err(DetailsError::UnknownAttribute(id.clone()))
    );
    assert_eq!(p.adapter.calls_to(Operation::ReadDescriptor).await, vec![]);
    assert_eq!(errors(&mut p.events), vec![DetailsError::UnknownAttribute(id)]);
}

#[tokio::test]
async fn read_without_adapter() {
    let mut p = discovered_peripheral().await;
    p.details.close_adapter().await;
    assert_eq!(
        p.details.read_characteristic(&p.status).await,
        Err(DetailsError::NoAdapterSelected)
    );
    assert_eq!(p.adapter.calls_to(Operation::ReadCharacteristic).await, vec![]);
    assert_eq!(errors(&mut p.events), vec![DetailsError::NoAdapterSelected]);
}

#[tokio::test]
async fn value_changed() {
    let mut p = discovered_peripheral().await;
    let id = AttributeId::from(p.control.clone());
    p.details.handle_value_changed(id.clone(), vec![42]).await;
    let tree = p.details.snapshot().await;
    assert_eq!(tree.node(&id).unwrap().value, Some(vec![42]));

    let unknown = AttributeId::from(p.control.descriptor(99));
    let version = p.details.version().await;
    p.details.handle_value_changed(unknown, vec![1]).await;
    assert_eq!(p.details.version().await, version);
    assert_eq!(errors(&mut p.events), vec![]);
}
