//! Standard Bluetooth SIG UUIDs the client cares about.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid =
    Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_GENERIC_ATTRIBUTE_SERVICE: Uuid =
    Uuid::from_u128(0x00001801_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
pub const UUID_APPEARANCE: Uuid = Uuid::from_u128(0x00002a01_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const UUID_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const UUID_SERIAL_NUMBER: Uuid = Uuid::from_u128(0x00002a25_0000_1000_8000_00805f9b34fb);
pub const UUID_FIRMWARE_REVISION: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const UUID_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

/// Well-known name for a standard service UUID, if there is one.
pub fn service_name(uuid: Uuid) -> Option<&'static str> {
    if uuid == UUID_GENERIC_ACCESS_SERVICE {
        Some("Generic Access")
    } else if uuid == UUID_GENERIC_ATTRIBUTE_SERVICE {
        Some("Generic Attribute")
    } else if uuid == UUID_DEVICE_INFORMATION_SERVICE {
        Some("Device Information")
    } else if uuid == UUID_BATTERY_SERVICE {
        Some("Battery Service")
    } else {
        None
    }
}

/// Well-known name for a standard characteristic UUID, if there is one.
pub fn characteristic_name(uuid: Uuid) -> Option<&'static str> {
    if uuid == UUID_DEVICE_NAME {
        Some("Device Name")
    } else if uuid == UUID_APPEARANCE {
        Some("Appearance")
    } else if uuid == UUID_BATTERY_LEVEL {
        Some("Battery Level")
    } else if uuid == UUID_MODEL_NUMBER {
        Some("Model Number String")
    } else if uuid == UUID_SERIAL_NUMBER {
        Some("Serial Number String")
    } else if uuid == UUID_FIRMWARE_REVISION {
        Some("Firmware Revision String")
    } else if uuid == UUID_MANUFACTURER_NAME {
        Some("Manufacturer Name String")
    } else {
        None
    }
}
