//! bluest-backed implementation of the GATT contracts.
//!
//! Wraps `bluest::Adapter`/`Device`/`Service`/`Characteristic` one-to-one and
//! keeps a registry of platform device handles so sessions can address a
//! device by its stable id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Descriptor, Device, DeviceId, Service};
use futures_util::StreamExt;
use futures_util::stream;
use log::{info, warn};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::error::GattError;
use crate::gatt::{
    AdapterEvent, CharacteristicProps, ConnectionState, GattAdapter, GattCharacteristic,
    GattDescriptor, GattDevice, GattService, ReadResult, ValueStream, WriteType,
};

impl From<bluest::Error> for GattError {
    fn from(err: bluest::Error) -> Self {
        GattError::Operation(err.to_string())
    }
}

/// Derives the stable trait-level id for a platform device id.
///
/// Platform ids that already are UUIDs parse directly; anything else is
/// hashed into a v5 UUID so the mapping stays deterministic across runs.
pub fn device_uuid(id: &DeviceId) -> Uuid {
    let raw = id.to_string();
    Uuid::parse_str(&raw).unwrap_or_else(|_| Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes()))
}

/// The production GATT stack: one `bluest` adapter plus the device registry.
pub struct BluestGatt {
    adapter: Adapter,
    /// Map of device ids to platform device handles
    devices: Arc<Mutex<HashMap<Uuid, Device>>>,
    events: broadcast::Sender<AdapterEvent>,
}

impl BluestGatt {
    /// Opens the default adapter and waits for it to become available.
    pub async fn new() -> Result<Self, GattError> {
        let adapter = Adapter::default()
            .await
            .ok_or(GattError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            events,
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Adds a platform device handle to the registry, returning its stable id.
    pub(crate) async fn register(&self, device: Device) -> Uuid {
        let id = device_uuid(&device.id());
        self.devices.lock().await.insert(id, device);
        id
    }

    async fn lookup(&self, device_id: Uuid) -> Result<Device, GattError> {
        let devices = self.devices.lock().await;
        devices
            .get(&device_id)
            .cloned()
            .ok_or(GattError::DeviceNotFound(device_id))
    }

    /// Connects to a registered device and returns its trait-level handle.
    pub async fn connect(&self, device_id: Uuid) -> Result<Arc<dyn GattDevice>, GattError> {
        let device = self.lookup(device_id).await?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", device_id, name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device_id);
            self.adapter.connect_device(&device).await?;
        }
        self.watch_connection(device_id, device.clone());

        Ok(Arc::new(BluestDevice { device }))
    }

    /// Connects with the retry policy from the configuration.
    pub async fn connect_with_retry(
        &self,
        device_id: Uuid,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn GattDevice>, GattError> {
        let mut retry_count = 0;
        let mut last_error = None;

        while retry_count < config.max_retries {
            match self.connect(device_id).await {
                Ok(device) => {
                    info!("Successfully connected to device");
                    return Ok(device);
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", retry_count + 1, e);
                    last_error = Some(e);

                    if retry_count < config.max_retries - 1 {
                        info!("Retrying connection in {} ms...", config.retry_delay_ms);
                        tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                    }
                }
            }
            retry_count += 1;
        }

        Err(last_error.unwrap_or_else(|| {
            GattError::Operation(format!(
                "failed to connect after {} attempts",
                config.max_retries
            ))
        }))
    }

    /// Forwards platform connection events for one device into the shared
    /// adapter event channel. The platform stream does not distinguish a
    /// dropped link from a requested disconnect, so everything surfaces as
    /// `Disconnected`.
    fn watch_connection(&self, device_id: Uuid, device: Device) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match adapter.device_connection_events(&device).await {
                Ok(mut stream) => {
                    while let Some(event) = stream.next().await {
                        match event {
                            ConnectionEvent::Connected => {
                                info!("Device {} connected", device_id);
                            }
                            ConnectionEvent::Disconnected => {
                                info!("Device {} disconnected", device_id);
                                let _ = events.send(AdapterEvent::Disconnected { device_id });
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "Could not watch connection events for {}: {}",
                        device_id, e
                    );
                }
            }
        });
    }
}

#[async_trait]
impl GattAdapter for BluestGatt {
    async fn disconnect_device(&self, device_id: Uuid) -> Result<(), GattError> {
        let device = self.lookup(device_id).await?;
        if device.is_connected().await {
            info!("Disconnecting from device {}", device_id);
            self.adapter.disconnect_device(&device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device_id);
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

struct BluestDevice {
    device: Device,
}

#[async_trait]
impl GattDevice for BluestDevice {
    fn id(&self) -> Uuid {
        device_uuid(&self.device.id())
    }

    fn name(&self) -> Option<String> {
        self.device.name().ok()
    }

    async fn connection_state(&self) -> ConnectionState {
        // bluest only exposes the connected bit, not the transitional states.
        if self.device.is_connected().await {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn services(&self) -> Result<Vec<Arc<dyn GattService>>, GattError> {
        let services = self.device.services().await?;
        Ok(services
            .into_iter()
            .map(|service| Arc::new(BluestService { service }) as Arc<dyn GattService>)
            .collect())
    }
}

struct BluestService {
    service: Service,
}

#[async_trait]
impl GattService for BluestService {
    fn uuid(&self) -> Uuid {
        self.service.uuid()
    }

    async fn characteristics(&self) -> Result<Vec<Arc<dyn GattCharacteristic>>, GattError> {
        let characteristics = self.service.characteristics().await?;
        Ok(characteristics
            .into_iter()
            .map(|characteristic| {
                Arc::new(BluestCharacteristic { characteristic }) as Arc<dyn GattCharacteristic>
            })
            .collect())
    }
}

struct BluestCharacteristic {
    characteristic: Characteristic,
}

#[async_trait]
impl GattCharacteristic for BluestCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid()
    }

    async fn properties(&self) -> Result<CharacteristicProps, GattError> {
        let props = self.characteristic.properties().await?;
        Ok(CharacteristicProps {
            read: props.read,
            write: props.write,
            write_without_response: props.write_without_response,
            notify: props.notify,
        })
    }

    async fn read(&self) -> Result<ReadResult, GattError> {
        let data = self.characteristic.read().await?;
        // bluest does not surface ATT status codes; a completed read is 0.
        Ok(ReadResult {
            data: data.to_vec(),
            result_code: 0,
        })
    }

    async fn write(&self, data: &[u8], write_type: WriteType) -> Result<i32, GattError> {
        match write_type {
            WriteType::WithResponse => self.characteristic.write(data).await?,
            WriteType::WithoutResponse => {
                self.characteristic.write_without_response(data).await?
            }
        }
        Ok(0)
    }

    /// bluest's notification stream borrows the characteristic, so the
    /// subscription runs in its own task that owns a clone and forwards
    /// values through a channel. Dropping the returned stream stops the
    /// task, which drops the platform stream and ends the subscription.
    async fn start_updates(&self) -> Result<ValueStream, GattError> {
        let characteristic = self.characteristic.clone();
        let uuid = characteristic.uuid();
        let (tx, rx) = mpsc::channel::<Result<Vec<u8>, GattError>>(32);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), GattError>>();

        tokio::spawn(async move {
            let mut updates = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
            };
            while let Some(item) = updates.next().await {
                let forwarded = item.map(|value| value.to_vec()).map_err(GattError::from);
                if tx.send(forwarded).await.is_err() {
                    // Receiver dropped: unsubscribe by letting the stream go.
                    break;
                }
            }
            info!("Notification stream for {} ended", uuid);
        });

        ready_rx
            .await
            .map_err(|_| GattError::Operation("notification task exited".to_string()))??;

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn stop_updates(&self) -> Result<(), GattError> {
        // Update delivery stops when the stream returned by `start_updates`
        // is dropped; there is no separate platform call to issue here.
        Ok(())
    }

    async fn descriptors(&self) -> Result<Vec<Arc<dyn GattDescriptor>>, GattError> {
        let descriptors = self.characteristic.descriptors().await?;
        Ok(descriptors
            .into_iter()
            .map(|descriptor| Arc::new(BluestDescriptor { descriptor }) as Arc<dyn GattDescriptor>)
            .collect())
    }
}

struct BluestDescriptor {
    descriptor: Descriptor,
}

#[async_trait]
impl GattDescriptor for BluestDescriptor {
    fn uuid(&self) -> Uuid {
        self.descriptor.uuid()
    }

    async fn read(&self) -> Result<Vec<u8>, GattError> {
        let data = self.descriptor.read().await?;
        Ok(data.to_vec())
    }
}
