//! The GATT library boundary.
//!
//! The session layer talks to the Bluetooth stack only through the trait
//! contracts defined here: an adapter that can tear down links and push
//! connection events, and device/service/characteristic handles for
//! discovery, reads, writes, and value-update subscriptions. The production
//! implementation wraps `bluest`; tests run against an in-memory fake.

pub mod bluest;
mod types;
pub mod uuids;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::GattError;

pub use types::{
    AdapterEvent, CharacteristicProps, ConnectionState, ReadResult, ValueStream, WriteType,
};

/// Adapter-level contract: link teardown plus pushed connection events.
#[async_trait]
pub trait GattAdapter: Send + Sync {
    /// Asks the platform stack to tear down the link to the given device.
    async fn disconnect_device(&self, device_id: Uuid) -> Result<(), GattError>;

    /// Subscribes to connection-lost / disconnected pushes.
    fn events(&self) -> broadcast::Receiver<AdapterEvent>;
}

/// One peripheral, already known to the adapter.
#[async_trait]
pub trait GattDevice: Send + Sync {
    fn id(&self) -> Uuid;

    fn name(&self) -> Option<String>;

    /// Current link state, observed from the stack on every call.
    async fn connection_state(&self) -> ConnectionState;

    /// Enumerates the device's GATT services.
    async fn services(&self) -> Result<Vec<Arc<dyn GattService>>, GattError>;
}

/// A logical grouping of characteristics on a peripheral.
#[async_trait]
pub trait GattService: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// Enumerates the service's characteristics.
    async fn characteristics(&self) -> Result<Vec<Arc<dyn GattCharacteristic>>, GattError>;
}

/// A readable/writable/notifiable data point within a service.
#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn properties(&self) -> Result<CharacteristicProps, GattError>;

    async fn read(&self) -> Result<ReadResult, GattError>;

    async fn write(&self, data: &[u8], write_type: WriteType) -> Result<i32, GattError>;

    /// Enables value notifications and returns the stream they arrive on.
    /// The stream is the single attach point for a subscriber; dropping it
    /// detaches the listener.
    async fn start_updates(&self) -> Result<ValueStream, GattError>;

    /// Disables value notifications.
    async fn stop_updates(&self) -> Result<(), GattError>;

    /// Enumerates the characteristic's descriptors.
    async fn descriptors(&self) -> Result<Vec<Arc<dyn GattDescriptor>>, GattError>;
}

/// Metadata attached to a characteristic.
#[async_trait]
pub trait GattDescriptor: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn read(&self) -> Result<Vec<u8>, GattError>;
}
