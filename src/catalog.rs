//! Human readable names for GATT services and characteristics.
//!
//! The catalog is a fixed table built once on first use and never mutated, so it can be shared freely between
//! sessions. Lookups accept UUID strings in any letter case; unknown or unparsable input is handed back unchanged.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use uuid::Uuid;

use crate::btuuid::{bluetooth_uuid_from_u16, BluetoothUuidExt};

/// Broad grouping of a service UUID, used for sorting and filtering in attribute lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Generic Access and Generic Attribute
    Generic,
    /// Device Information and Battery
    DeviceInfo,
    /// Heart rate, blood pressure, glucose and thermometer services
    HealthFitness,
    /// Other services in the `0x181x` range
    Sensor,
    /// LE audio services
    Audio,
    /// Everything else, including vendor specific 128-bit services
    Custom,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Category::Generic => "Generic",
            Category::DeviceInfo => "Device Information",
            Category::HealthFitness => "Health & Fitness",
            Category::Sensor => "Sensor",
            Category::Audio => "Audio",
            Category::Custom => "Custom",
        })
    }
}

const SERVICES: &[(u16, &str)] = &[
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x180A, "Device Information"),
    (0x180F, "Battery Service"),
    (0x180D, "Heart Rate"),
    (0x1810, "Blood Pressure"),
    (0x1808, "Glucose"),
    (0x1809, "Health Thermometer"),
    (0x181C, "User Data"),
    (0x181D, "Weight Scale"),
    (0x1805, "Current Time"),
    (0x1806, "Reference Time Update"),
    (0x1807, "Next DST Change"),
    (0x1811, "Alert Notification"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1814, "Running Speed and Cadence"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x1818, "Cycling Power"),
    (0x1819, "Location and Navigation"),
    (0x181A, "Environmental Sensing"),
    (0x181B, "Body Composition"),
    (0x183B, "Audio Stream Control Service"),
    (0x1844, "Volume Control"),
    (0x1850, "Audio Input Control"),
];

const CHARACTERISTICS: &[(u16, &str)] = &[
    // Generic Access
    (0x2A00, "Device Name"),
    (0x2A01, "Appearance"),
    (0x2A04, "Peripheral Preferred Connection Parameters"),
    (0x2AA6, "Central Address Resolution"),
    // Device Information
    (0x2A29, "Manufacturer Name"),
    (0x2A24, "Model Number"),
    (0x2A25, "Serial Number"),
    (0x2A27, "Hardware Revision"),
    (0x2A26, "Firmware Revision"),
    (0x2A28, "Software Revision"),
    (0x2A23, "System ID"),
    (0x2A2A, "IEEE 11073-20601 Regulatory Certification"),
    (0x2A50, "PnP ID"),
    // Battery
    (0x2A19, "Battery Level"),
    (0x2A1A, "Battery Power State"),
    (0x2A1B, "Battery Level State"),
    // Heart Rate
    (0x2A37, "Heart Rate Measurement"),
    (0x2A38, "Body Sensor Location"),
    (0x2A39, "Heart Rate Control Point"),
    // Blood Pressure
    (0x2A35, "Blood Pressure Measurement"),
    (0x2A36, "Intermediate Cuff Pressure"),
    (0x2A49, "Blood Pressure Feature"),
    // Glucose
    (0x2A18, "Glucose Measurement"),
    (0x2A34, "Glucose Measurement Context"),
    (0x2A51, "Glucose Feature"),
    (0x2A52, "Record Access Control Point"),
    // Temperature
    (0x2A1C, "Temperature Measurement"),
    (0x2A1D, "Temperature Type"),
    (0x2A1E, "Intermediate Temperature"),
    (0x2A21, "Measurement Interval"),
    // Alert
    (0x2A06, "Alert Level"),
    (0x2A46, "New Alert"),
    (0x2A47, "Unread Alert Status"),
    (0x2A44, "Alert Notification Control Point"),
    (0x2A45, "Alert Category ID"),
    (0x2A48, "Supported New Alert Category"),
    (0x2A42, "Alert Category ID Bit Mask"),
    // Time
    (0x2A2B, "Current Time"),
    (0x2A0F, "Local Time Information"),
    (0x2A14, "Reference Time Information"),
    (0x2A16, "Time Update Control Point"),
    (0x2A17, "Time Update State"),
    // Cycling & Running
    (0x2A5B, "CSC Measurement"),
    (0x2A5C, "CSC Feature"),
    (0x2A53, "RSC Measurement"),
    (0x2A54, "RSC Feature"),
    // Environmental
    (0x2A6E, "Temperature"),
    (0x2A6F, "Humidity"),
    (0x2A6D, "Pressure"),
    (0x2A76, "UV Index"),
    // Generic Attribute
    (0x2A05, "Service Changed"),
    (0x2A07, "Tx Power Level"),
];

// Services win over characteristics; the two ranges never overlap.
static NAMES: LazyLock<HashMap<Uuid, &'static str>> = LazyLock::new(|| {
    CHARACTERISTICS
        .iter()
        .chain(SERVICES)
        .map(|&(short, name)| (bluetooth_uuid_from_u16(short), name))
        .collect()
});

fn canonical(uuid: &str) -> Option<Uuid> {
    Uuid::parse_str(uuid.trim()).ok()
}

/// Returns the display name for `uuid`, or `uuid` itself when it is not a known standard attribute.
pub fn lookup(uuid: &str) -> Cow<'_, str> {
    match canonical(uuid).and_then(|uuid| NAMES.get(&uuid)) {
        Some(name) => Cow::Borrowed(*name),
        None => Cow::Borrowed(uuid),
    }
}

/// Returns the display name for `uuid` if it is a known standard attribute.
pub fn lookup_uuid(uuid: &Uuid) -> Option<&'static str> {
    NAMES.get(uuid).copied()
}

/// Is `uuid` one of the standard services or characteristics in the catalog?
pub fn is_standard(uuid: &str) -> bool {
    canonical(uuid).is_some_and(|uuid| NAMES.contains_key(&uuid))
}

/// Classifies a service UUID by the leading 32 bits of its canonical form.
pub fn category_of(uuid: &str) -> Category {
    let Some(uuid) = canonical(uuid) else {
        return Category::Custom;
    };
    match uuid.prefix() {
        0x1800 | 0x1801 => Category::Generic,
        0x180A | 0x180F => Category::DeviceInfo,
        0x180D | 0x1810 | 0x1808 | 0x1809 => Category::HealthFitness,
        0x1810..=0x181F => Category::Sensor,
        0x1830..=0x183F | 0x1844 | 0x1850 => Category::Audio,
        _ => Category::Custom,
    }
}

/// Expands a 16-bit short form such as `"2A19"` into the full lowercase 128-bit UUID string.
pub fn from_16bit_uuid(short: &str) -> String {
    format!("0000{}-0000-1000-8000-00805f9b34fb", short.trim().to_lowercase())
}

/// The registered name of a Bluetooth SIG company identifier, as carried in manufacturer specific data.
pub fn company_name(company_id: u16) -> Option<&'static str> {
    Some(match company_id {
        0 => "Ericsson AB",
        2 => "Intel Corp.",
        6 => "Microsoft",
        76 => "Apple, Inc.",
        86 => "Sony Ericsson Mobile Communications AB",
        89 => "Nordic Semiconductor ASA",
        117 => "Samsung Electronics Co., Ltd.",
        133 => "Bose Corporation",
        184 => "Qualcomm Innovation Center, Inc.",
        211 => "Fitbit, Inc.",
        224 => "Google LLC",
        256 => "Samsung Semiconductor, Inc.",
        305 => "Garmin International, Inc.",
        _ => return None,
    })
}
