//! Bluetooth short-form UUIDs and the assigned numbers this crate refers to by name

use uuid::Uuid;

/// `0000xxxx-0000-1000-8000-00805f9b34fb`: the UUID that SIG-assigned 16 and 32-bit numbers are shorthand for.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

const SHORT_MASK: u128 = (1 << 96) - 1;

/// Expands an assigned 16-bit number in a `const` context.
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    bluetooth_uuid_from_u32(uuid as u32)
}

/// Expands an assigned 32-bit number in a `const` context.
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (uuid as u128) << 96)
}

/// Short-form conversions on [`Uuid`].
pub trait BluetoothUuidExt: private::Sealed {
    #[allow(missing_docs)]
    fn from_u16(uuid: u16) -> Self;

    #[allow(missing_docs)]
    fn from_u32(uuid: u32) -> Self;

    /// Built on the base UUID with a number that fits in 16 bits?
    fn is_u16_uuid(&self) -> bool;

    /// Built on the base UUID?
    fn is_u32_uuid(&self) -> bool;

    /// The 16-bit short form, if there is one.
    fn try_to_u16(&self) -> Option<u16>;

    /// The 32-bit short form, if there is one.
    fn try_to_u32(&self) -> Option<u32>;

    /// The leading 32 bits, whether or not the UUID is built on the base UUID.
    fn prefix(&self) -> u32;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn from_u32(uuid: u32) -> Self {
        bluetooth_uuid_from_u32(uuid)
    }

    fn is_u16_uuid(&self) -> bool {
        self.try_to_u16().is_some()
    }

    fn is_u32_uuid(&self) -> bool {
        self.as_u128() & SHORT_MASK == BLUETOOTH_BASE_UUID
    }

    fn try_to_u16(&self) -> Option<u16> {
        self.try_to_u32().and_then(|short| u16::try_from(short).ok())
    }

    fn try_to_u32(&self) -> Option<u32> {
        self.is_u32_uuid().then(|| self.prefix())
    }

    fn prefix(&self) -> u32 {
        (self.as_u128() >> 96) as u32
    }
}

mod private {
    use uuid::Uuid;

    pub trait Sealed {}

    impl Sealed for Uuid {}
}

/// Services
pub mod services {
    #![allow(missing_docs)]

    use uuid::Uuid;

    use super::bluetooth_uuid_from_u16;

    pub const GENERIC_ACCESS: Uuid = bluetooth_uuid_from_u16(0x1800);
    pub const GENERIC_ATTRIBUTE: Uuid = bluetooth_uuid_from_u16(0x1801);
    pub const DEVICE_INFORMATION: Uuid = bluetooth_uuid_from_u16(0x180A);
    pub const HEART_RATE: Uuid = bluetooth_uuid_from_u16(0x180D);
    pub const BATTERY: Uuid = bluetooth_uuid_from_u16(0x180F);
    pub const ENVIRONMENTAL_SENSING: Uuid = bluetooth_uuid_from_u16(0x181A);
    pub const VOLUME_CONTROL: Uuid = bluetooth_uuid_from_u16(0x1844);
    /// Eddystone beacon service data UUID
    pub const EDDYSTONE: Uuid = bluetooth_uuid_from_u16(0xFEAA);
}

/// Characteristics
pub mod characteristics {
    #![allow(missing_docs)]

    use uuid::Uuid;

    use super::bluetooth_uuid_from_u16;

    pub const DEVICE_NAME: Uuid = bluetooth_uuid_from_u16(0x2A00);
    pub const SERVICE_CHANGED: Uuid = bluetooth_uuid_from_u16(0x2A05);
    pub const BATTERY_LEVEL: Uuid = bluetooth_uuid_from_u16(0x2A19);
    pub const MANUFACTURER_NAME_STRING: Uuid = bluetooth_uuid_from_u16(0x2A29);
    pub const HEART_RATE_MEASUREMENT: Uuid = bluetooth_uuid_from_u16(0x2A37);
    pub const HEART_RATE_CONTROL_POINT: Uuid = bluetooth_uuid_from_u16(0x2A39);
}

/// Descriptors
pub mod descriptors {
    #![allow(missing_docs)]

    use uuid::Uuid;

    use super::bluetooth_uuid_from_u16;

    pub const CHARACTERISTIC_EXTENDED_PROPERTIES: Uuid = bluetooth_uuid_from_u16(0x2900);
    pub const CHARACTERISTIC_USER_DESCRIPTION: Uuid = bluetooth_uuid_from_u16(0x2901);
    /// Written to enable or disable notifications and indications
    pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = bluetooth_uuid_from_u16(0x2902);
    pub const CHARACTERISTIC_PRESENTATION_FORMAT: Uuid = bluetooth_uuid_from_u16(0x2904);
}
