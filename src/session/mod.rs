//! Session layer: the orchestration a client application builds on top of
//! the GATT boundary — device lifetime, two-phase discovery, characteristic
//! interaction, and the change notifications the UI binds to.

mod characteristic;
mod device;
mod discovery;
mod events;

pub use characteristic::{CharacteristicHandle, hex_string};
pub use device::{DeviceSession, mac_address};
pub use discovery::ServiceGroup;
pub use events::{
    AlertSink, CharacteristicEvent, CharacteristicProperty, LogAlertSink, SessionEvent,
    SessionProperty,
};
