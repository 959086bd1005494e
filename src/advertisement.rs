//! Peripherals as reported by a scanner, and the beacon formats that can be read out of their advertisements.

use std::collections::HashMap;

use uuid::Uuid;

use crate::btuuid::services;

/// Manufacturer specific data included in Bluetooth advertisements. See the Bluetooth Core Specification Supplement
/// §A.1.4 for details.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManufacturerData {
    /// Company identifier (defined [here](https://www.bluetooth.com/specifications/assigned-numbers/company-identifiers/))
    pub company_id: u16,
    /// Manufacturer specific data
    pub data: Vec<u8>,
}

/// A peripheral discovered by a scanner.
///
/// The session treats this as an opaque input to [`Session::connect`][crate::Session::connect]; only the
/// `address` identifies the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    /// Platform address of the peripheral, e.g. `"C0:FF:EE:00:11:22"`
    pub address: String,
    /// The (possibly shortened) local name of the device (CSS §A.1.2)
    pub advertised_name: Option<String>,
    /// The signal strength in dBm of the received advertisement packet
    pub rssi: i16,
    /// Manufacturer specific data (CSS §A.1.4)
    pub manufacturer_data: Option<ManufacturerData>,
    /// Advertised GATT service UUIDs (CSS §A.1.1)
    pub service_uuids: Vec<Uuid>,
    /// Service associated data (CSS §A.1.11)
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Transmitted power level (CSS §A.1.5)
    pub tx_power_level: Option<i16>,
}

impl PeripheralHandle {
    /// A handle with only an address, as obtained from a bonded device list.
    pub fn new(address: impl Into<String>) -> Self {
        PeripheralHandle {
            address: address.into(),
            advertised_name: None,
            rssi: 0,
            manufacturer_data: None,
            service_uuids: Vec::new(),
            service_data: HashMap::new(),
            tx_power_level: None,
        }
    }

    /// The advertised name, or `"(unknown)"`.
    pub fn display_name(&self) -> &str {
        self.advertised_name.as_deref().unwrap_or("(unknown)")
    }

    /// Rough distance to the peripheral in meters, from its last RSSI and the typical 1 m power of -59 dBm.
    pub fn estimated_distance(&self) -> f64 {
        estimate_distance(self.rssi, DEFAULT_MEASURED_POWER)
    }

    /// The name of the manufacturer advertised in the manufacturer specific data, if it is a known company.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        self.manufacturer_data
            .as_ref()
            .and_then(|data| crate::catalog::company_name(data.company_id))
    }
}

const DEFAULT_MEASURED_POWER: i16 = -59;
const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Log-distance path loss estimate: the distance in meters at which a transmitter measured at
/// `measured_power` dBm from 1 m would be received at `rssi` dBm, in free space.
pub fn estimate_distance(rssi: i16, measured_power: i16) -> f64 {
    10f64.powf(f64::from(measured_power - rssi) / (10.0 * PATH_LOSS_EXPONENT))
}

const APPLE_COMPANY_ID: u16 = 0x004C;
const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;

/// Apple iBeacon payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeacon {
    /// Proximity UUID
    pub uuid: Uuid,
    /// Group identifier within the proximity UUID
    pub major: u16,
    /// Beacon identifier within the group
    pub minor: u16,
    /// Calibrated RSSI at 1 m, in dBm
    pub tx_power: i8,
}

impl IBeacon {
    /// Distance in meters estimated from a received `rssi` and the beacon's own calibration.
    pub fn distance(&self, rssi: i16) -> f64 {
        estimate_distance(rssi, self.tx_power.into())
    }
}

/// A beacon frame decoded from an advertisement.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Beacon {
    /// Apple iBeacon
    IBeacon(IBeacon),
    /// Eddystone-UID frame
    EddystoneUid {
        tx_power: i8,
        namespace: [u8; 10],
        instance: [u8; 6],
    },
    /// Eddystone-URL frame with the URL already expanded
    EddystoneUrl { tx_power: i8, url: String },
    /// Eddystone-TLM frame; only the version is decoded
    EddystoneTlm { version: u8 },
}

impl Beacon {
    /// Decodes the first beacon frame found in `handle`'s advertisement, iBeacon first.
    pub fn parse(handle: &PeripheralHandle) -> Option<Beacon> {
        if let Some(beacon) = handle.manufacturer_data.as_ref().and_then(parse_ibeacon) {
            return Some(Beacon::IBeacon(beacon));
        }
        handle
            .service_data
            .get(&services::EDDYSTONE)
            .and_then(|data| parse_eddystone(data))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl std::fmt::Display for Beacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Beacon::IBeacon(b) => write!(
                f,
                "iBeacon {} major {} minor {} tx {} dBm",
                b.uuid, b.major, b.minor, b.tx_power
            ),
            Beacon::EddystoneUid {
                tx_power,
                namespace,
                instance,
            } => write!(
                f,
                "Eddystone-UID namespace {} instance {} tx {} dBm",
                hex(namespace),
                hex(instance),
                tx_power
            ),
            Beacon::EddystoneUrl { tx_power, url } => write!(f, "Eddystone-URL {url} tx {tx_power} dBm"),
            Beacon::EddystoneTlm { version } => write!(f, "Eddystone-TLM version {version}"),
        }
    }
}

fn parse_ibeacon(data: &ManufacturerData) -> Option<IBeacon> {
    let d = &data.data;
    if data.company_id != APPLE_COMPANY_ID || d.len() < 23 || d[0] != IBEACON_TYPE || d[1] != IBEACON_LENGTH {
        return None;
    }
    Some(IBeacon {
        uuid: Uuid::from_slice(&d[2..18]).ok()?,
        major: u16::from_be_bytes([d[18], d[19]]),
        minor: u16::from_be_bytes([d[20], d[21]]),
        tx_power: d[22] as i8,
    })
}

fn parse_eddystone(data: &[u8]) -> Option<Beacon> {
    match *data.first()? {
        0x00 if data.len() >= 18 => Some(Beacon::EddystoneUid {
            tx_power: data[1] as i8,
            namespace: data[2..12].try_into().ok()?,
            instance: data[12..18].try_into().ok()?,
        }),
        0x10 if data.len() >= 3 => Some(Beacon::EddystoneUrl {
            tx_power: data[1] as i8,
            url: format!("{}{}", url_scheme(data[2]), expand_url(&data[3..])),
        }),
        0x20 if data.len() >= 14 => Some(Beacon::EddystoneTlm { version: data[1] }),
        _ => None,
    }
}

fn url_scheme(code: u8) -> &'static str {
    match code {
        0x00 => "http://www.",
        0x01 => "https://www.",
        0x02 => "http://",
        0x03 => "https://",
        _ => "",
    }
}

fn expand_url(encoded: &[u8]) -> String {
    const EXPANSIONS: [&str; 14] = [
        ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu", ".net", ".info",
        ".biz", ".gov",
    ];
    let mut url = String::new();
    for &code in encoded {
        match EXPANSIONS.get(code as usize) {
            Some(expansion) => url.push_str(expansion),
            None if (32..=126).contains(&code) => url.push(code as char),
            None => {}
        }
    }
    url
}
