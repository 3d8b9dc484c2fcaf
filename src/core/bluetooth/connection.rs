//! Bluetooth connection handling for the alert peripheral
//! This module maps GATT requests onto bluest calls and reports their
//! completions back to the session as events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::bluetooth::constants::{GATT_ERROR, UUID_CCCD};
use crate::core::bluetooth::events::{EventSink, GattEvent, GattStatus, LinkState};
use crate::core::bluetooth::session::GattLink;
use crate::core::bluetooth::types::{CharacteristicRef, DescriptorRef, DiscoveredCharacteristic, DiscoveredService};

type CharacteristicCache = Arc<Mutex<HashMap<CharacteristicRef, Characteristic>>>;

/// State of one open connection
struct Connection {
    device: Device,
    events: EventSink,
    characteristics: CharacteristicCache,
    /// Characteristics whose value changes are forwarded
    delivering: Arc<Mutex<HashSet<CharacteristicRef>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    fn characteristic(&self, target: &CharacteristicRef) -> Option<Characteristic> {
        self.characteristics.lock().unwrap().get(target).cloned()
    }
}

/// GATT link backed by a bluest adapter
pub struct BluestLink {
    adapter: Option<Adapter>,
    connection: Mutex<Option<Connection>>,
}

impl BluestLink {
    pub fn new(adapter: Option<Adapter>) -> Self {
        Self {
            adapter,
            connection: Mutex::new(None),
        }
    }

    /// Walks services, characteristics and descriptors of a connected device.
    async fn discover_attributes(
        device: &Device,
    ) -> bluest::Result<(Vec<DiscoveredService>, HashMap<CharacteristicRef, Characteristic>)> {
        let mut services = Vec::new();
        let mut handles = HashMap::new();

        for service in device.discover_services().await? {
            let service_uuid = service.uuid();
            let mut characteristics = Vec::new();

            for characteristic in service.discover_characteristics().await? {
                let uuid = characteristic.uuid();
                let mut descriptors: Vec<Uuid> = match characteristic.discover_descriptors().await {
                    Ok(descriptors) => descriptors.iter().map(|d| d.uuid()).collect(),
                    Err(e) => {
                        debug!("Descriptor discovery failed for {}: {}", uuid, e);
                        Vec::new()
                    }
                };
                // BlueZ manages the CCCD itself and does not list it, but any
                // notify or indicate characteristic carries one.
                let notifies = characteristic
                    .properties()
                    .await
                    .is_ok_and(|p| p.notify || p.indicate);
                if notifies && !descriptors.contains(&UUID_CCCD) {
                    descriptors.push(UUID_CCCD);
                }

                handles.insert(
                    CharacteristicRef { service: service_uuid, characteristic: uuid },
                    characteristic,
                );
                characteristics.push(DiscoveredCharacteristic { uuid, descriptors });
            }
            services.push(DiscoveredService { uuid: service_uuid, characteristics });
        }

        Ok((services, handles))
    }

    /// Opens the notification stream, which registers the CCCD on the peer,
    /// then forwards value changes until the stream ends.
    async fn subscribe(
        device: Device,
        characteristic: Characteristic,
        target: CharacteristicRef,
        delivering: Arc<Mutex<HashSet<CharacteristicRef>>>,
        sink: EventSink,
    ) {
        info!("Subscribing to notifications on {}...", target.characteristic);
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                sink.post(GattEvent::DescriptorWritten { status: GattStatus::Failure(GATT_ERROR) });
                return;
            }
        };
        sink.post(GattEvent::DescriptorWritten { status: GattStatus::Success });

        while let Some(result) = notification_stream.next().await {
            match result {
                Ok(value) => {
                    debug!("Received alert data: {:?}", value);
                    if delivering.lock().unwrap().contains(&target) {
                        sink.post(GattEvent::CharacteristicChanged {
                            characteristic: target.characteristic,
                            value,
                        });
                    }
                }
                Err(e) => {
                    error!("Error in notification stream: {}", e);
                    break;
                }
            }
        }

        info!("Notification stream ended");
        if !device.is_connected().await {
            sink.post(GattEvent::ConnectionStateChanged {
                status: GattStatus::Success,
                state: LinkState::Disconnected,
            });
        } else {
            warn!("Notification stream ended while {} is still connected", device.id());
        }
    }

    /// Reports the first disconnect the platform sees for `device`, whatever
    /// the session is doing at the time.
    async fn watch_connection(adapter: &Adapter, device: &Device, sink: &EventSink) {
        match adapter.device_connection_events(device).await {
            Ok(events) => report_disconnect(events, sink).await,
            Err(e) => warn!("Cannot watch connection state of {}: {}", device.id(), e),
        }
    }

    async fn write_plain_descriptor(characteristic: Characteristic, descriptor: Uuid, value: Vec<u8>, sink: EventSink) {
        let status = match characteristic.discover_descriptors().await {
            Ok(descriptors) => match descriptors.into_iter().find(|d| d.uuid() == descriptor) {
                Some(found) => match found.write(&value).await {
                    Ok(()) => GattStatus::Success,
                    Err(e) => {
                        error!("Descriptor write failed: {}", e);
                        GattStatus::Failure(GATT_ERROR)
                    }
                },
                None => {
                    error!("Descriptor {} disappeared", descriptor);
                    GattStatus::Failure(GATT_ERROR)
                }
            },
            Err(e) => {
                error!("Descriptor lookup failed: {}", e);
                GattStatus::Failure(GATT_ERROR)
            }
        };
        sink.post(GattEvent::DescriptorWritten { status });
    }
}

async fn report_disconnect<S>(mut connection_events: S, sink: &EventSink)
where
    S: Stream<Item = ConnectionEvent> + Unpin,
{
    while let Some(event) = connection_events.next().await {
        debug!("Connection event: {:?}", event);
        if event == ConnectionEvent::Disconnected {
            info!("Device disconnected");
            sink.post(GattEvent::ConnectionStateChanged {
                status: GattStatus::Success,
                state: LinkState::Disconnected,
            });
            return;
        }
    }
    debug!("Connection event stream ended");
}

impl GattLink for BluestLink {
    type Device = Device;

    fn connect(&self, device: &Device, events: EventSink) {
        let mut guard = self.connection.lock().unwrap();
        if let Some(previous) = guard.take() {
            warn!("Replacing link state of {}", previous.device.id());
            for task in &previous.tasks {
                task.abort();
            }
        }

        let adapter = self.adapter.clone();
        let device_for_task = device.clone();
        let sink = events.clone();
        let task = tokio::spawn(async move {
            info!("Initiating connection to {} (session {})...", device_for_task.id(), sink.generation());
            let Some(adapter) = adapter else {
                error!("Connection to {} failed: no Bluetooth adapter", device_for_task.id());
                sink.post(GattEvent::ConnectionStateChanged {
                    status: GattStatus::Failure(GATT_ERROR),
                    state: LinkState::Disconnected,
                });
                return;
            };
            let result = if device_for_task.is_connected().await {
                Ok(())
            } else {
                adapter.connect_device(&device_for_task).await
            };
            match result {
                Ok(()) => {
                    sink.post(GattEvent::ConnectionStateChanged {
                        status: GattStatus::Success,
                        state: LinkState::Connected,
                    });
                    Self::watch_connection(&adapter, &device_for_task, &sink).await;
                }
                Err(e) => {
                    error!("Connection to {} failed: {}", device_for_task.id(), e);
                    sink.post(GattEvent::ConnectionStateChanged {
                        status: GattStatus::Failure(GATT_ERROR),
                        state: LinkState::Disconnected,
                    });
                }
            }
        });

        *guard = Some(Connection {
            device: device.clone(),
            events,
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            delivering: Arc::new(Mutex::new(HashSet::new())),
            tasks: vec![task],
        });
    }

    fn discover_services(&self) {
        let mut guard = self.connection.lock().unwrap();
        let Some(connection) = guard.as_mut() else {
            warn!("Service discovery requested without a connection");
            return;
        };

        let device = connection.device.clone();
        let cache = connection.characteristics.clone();
        let sink = connection.events.clone();
        let task = tokio::spawn(async move {
            info!("Discovering services on {}...", device.id());
            match Self::discover_attributes(&device).await {
                Ok((services, handles)) => {
                    *cache.lock().unwrap() = handles;
                    sink.post(GattEvent::ServicesDiscovered { status: GattStatus::Success, services });
                }
                Err(e) => {
                    error!("Service discovery failed: {}", e);
                    sink.post(GattEvent::ServicesDiscovered {
                        status: GattStatus::Failure(GATT_ERROR),
                        services: Vec::new(),
                    });
                }
            }
        });
        connection.tasks.push(task);
    }

    fn set_characteristic_notification(&self, characteristic: &CharacteristicRef, enable: bool) -> bool {
        let guard = self.connection.lock().unwrap();
        let Some(connection) = guard.as_ref() else {
            return false;
        };
        if connection.characteristic(characteristic).is_none() {
            return false;
        }
        let mut delivering = connection.delivering.lock().unwrap();
        if enable {
            delivering.insert(*characteristic);
        } else {
            delivering.remove(characteristic);
        }
        true
    }

    fn write_descriptor(&self, descriptor: &DescriptorRef, value: &[u8]) -> bool {
        let mut guard = self.connection.lock().unwrap();
        let Some(connection) = guard.as_mut() else {
            return false;
        };
        let Some(characteristic) = connection.characteristic(&descriptor.characteristic) else {
            return false;
        };

        let sink = connection.events.clone();
        if descriptor.descriptor == UUID_CCCD && value.iter().all(|b| *b == 0) {
            // Turning notifications off only stops local forwarding.
            connection.delivering.lock().unwrap().remove(&descriptor.characteristic);
            sink.post(GattEvent::DescriptorWritten { status: GattStatus::Success });
            return true;
        }
        let task = if descriptor.descriptor == UUID_CCCD {
            tokio::spawn(Self::subscribe(
                connection.device.clone(),
                characteristic,
                descriptor.characteristic,
                connection.delivering.clone(),
                sink,
            ))
        } else {
            tokio::spawn(Self::write_plain_descriptor(
                characteristic,
                descriptor.descriptor,
                value.to_vec(),
                sink,
            ))
        };
        connection.tasks.push(task);
        true
    }

    fn close(&self) {
        let Some(connection) = self.connection.lock().unwrap().take() else {
            return;
        };
        for task in &connection.tasks {
            task.abort();
        }

        let Some(adapter) = self.adapter.clone() else {
            return;
        };
        let device = connection.device;
        tokio::spawn(async move {
            if device.is_connected().await {
                info!("Disconnecting from device {}", device.id());
                match adapter.disconnect_device(&device).await {
                    Ok(()) => info!("Successfully disconnected"),
                    Err(e) => error!("Failed to disconnect: {}", e),
                }
            } else {
                info!("Device {} not connected", device.id());
            }
        });
    }
}
