//! Change notifications published by the session layer, plus the alert sink
//! the UI plugs in for user-visible failures.

use log::warn;
use serde::Serialize;

/// Session-level properties the UI binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionProperty {
    Connected,
    Services,
    ServiceCount,
    Characteristics,
    DiscoveryAllowed,
}

/// Events published by a [`DeviceSession`](crate::session::DeviceSession).
///
/// A `PropertyChanged` carries no value; receivers re-read the property from
/// the session so they always observe current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    PropertyChanged(SessionProperty),
    /// The disconnect request settled (successfully or not). Navigation away
    /// from the detail view hooks this.
    DisconnectSettled,
}

/// Per-characteristic properties, including the views derived from the
/// cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CharacteristicProperty {
    Value,
    ValueByteCount,
    ValueAsHex,
    StringValue,
    Subscribed,
    WriteType,
}

/// Events published by a [`CharacteristicHandle`](crate::session::CharacteristicHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CharacteristicEvent {
    PropertyChanged(CharacteristicProperty),
}

/// User-visible alert presentation, owned by the embedding application.
pub trait AlertSink: Send + Sync {
    fn show_alert(&self, title: &str, message: &str);
}

/// Default sink for headless use: alerts land in the log stream.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn show_alert(&self, title: &str, message: &str) {
        warn!("{}: {}", title, message);
    }
}
