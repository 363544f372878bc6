//! Defines shared data structures for the GATT boundary.

use serde::Serialize;
use uuid::Uuid;

use crate::error::GattError;

/// Connection state of a peripheral as reported by the platform stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Push events from the adapter about devices it tracks.
///
/// `ConnectionLost` is an unexpected link drop, `Disconnected` a completed
/// teardown. Both carry the device identity so listeners can filter for the
/// device they own.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    ConnectionLost {
        device_id: Uuid,
        error: Option<String>,
    },
    Disconnected {
        device_id: Uuid,
    },
}

impl AdapterEvent {
    pub fn device_id(&self) -> Uuid {
        match self {
            AdapterEvent::ConnectionLost { device_id, .. }
            | AdapterEvent::Disconnected { device_id } => *device_id,
        }
    }
}

/// Capability flags of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

/// How a write is issued to the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Result of a characteristic read: the raw bytes plus the library result
/// code (0 on stacks that do not surface ATT status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub data: Vec<u8>,
    pub result_code: i32,
}

/// Stream of value updates pushed by a subscribed characteristic.
pub type ValueStream = futures_util::stream::BoxStream<'static, Result<Vec<u8>, GattError>>;
