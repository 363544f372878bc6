//! Error types for the GATT boundary and the session layer.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the underlying GATT library.
///
/// Cloneable so a failure can be fanned out through notification streams.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GattError {
    #[error("no Bluetooth adapter found")]
    AdapterUnavailable,

    #[error("device not found with ID: {0}")]
    DeviceNotFound(Uuid),

    #[error("device is not connected")]
    NotConnected,

    #[error("operation cancelled")]
    Cancelled,

    /// Any other platform-stack failure, carried as its display text.
    #[error("{0}")]
    Operation(String),
}

impl GattError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GattError::Cancelled)
    }
}

/// Failures of session-level operations, one variant per operation so log
/// output and alerts always carry the operation name and target identity.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("service discovery failed: {0}")]
    Discovery(#[source] GattError),

    #[error("read from characteristic {uuid} failed: {source}")]
    Read {
        uuid: Uuid,
        #[source]
        source: GattError,
    },

    #[error("write to characteristic {uuid} failed: {source}")]
    Write {
        uuid: Uuid,
        #[source]
        source: GattError,
    },

    #[error("failed to subscribe to characteristic {uuid}: {source}")]
    Subscribe {
        uuid: Uuid,
        #[source]
        source: GattError,
    },

    #[error("failed to unsubscribe from characteristic {uuid}: {source}")]
    Unsubscribe {
        uuid: Uuid,
        #[source]
        source: GattError,
    },

    #[error("disconnect failed: {0}")]
    Disconnect(#[source] GattError),
}

impl SessionError {
    /// True when the underlying cause was a user cancellation rather than a
    /// GATT failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SessionError::Discovery(source)
            | SessionError::Read { source, .. }
            | SessionError::Write { source, .. }
            | SessionError::Subscribe { source, .. }
            | SessionError::Unsubscribe { source, .. }
            | SessionError::Disconnect(source) => source.is_cancelled(),
        }
    }
}
