//! Plain data shared between the session, its callers and the transport.

use std::time::SystemTime;

use uuid::Uuid;

use crate::btuuid::descriptors;

/// Lifecycle of the link to a single peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No link. The initial state.
    #[default]
    Disconnected,
    /// A link was requested and the transport has not reported it up yet.
    Connecting,
    /// The link is up; discovery starts right away.
    Connected,
    /// Services are being enumerated.
    Discovering,
    /// Services are known; characteristic operations are accepted.
    Ready,
    /// Teardown was requested and the transport has not confirmed it yet.
    Disconnecting,
}

impl ConnectionState {
    /// Is a link up or being established?
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Discovering | ConnectionState::Ready
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnecting => "disconnecting",
        })
    }
}

/// Bluetooth GATT characteristic properties
#[allow(missing_docs)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    /// Decodes the properties octet of a characteristic declaration.
    pub fn from_bits(bits: u8) -> Self {
        CharacteristicProperties {
            broadcast: (bits & (1 << 0)) != 0,
            read: (bits & (1 << 1)) != 0,
            write_without_response: (bits & (1 << 2)) != 0,
            write: (bits & (1 << 3)) != 0,
            notify: (bits & (1 << 4)) != 0,
            indicate: (bits & (1 << 5)) != 0,
            authenticated_signed_writes: (bits & (1 << 6)) != 0,
            extended_properties: (bits & (1 << 7)) != 0,
        }
    }

    /// Encodes the properties octet of a characteristic declaration.
    pub fn to_bits(self) -> u8 {
        u8::from(self.broadcast)
            | (u8::from(self.read) << 1)
            | (u8::from(self.write_without_response) << 2)
            | (u8::from(self.write) << 3)
            | (u8::from(self.notify) << 4)
            | (u8::from(self.indicate) << 5)
            | (u8::from(self.authenticated_signed_writes) << 6)
            | (u8::from(self.extended_properties) << 7)
    }

    /// Can the value be written with either write type?
    pub fn writable(self) -> bool {
        self.write || self.write_without_response
    }

    /// Can the peripheral push values, by notification or indication?
    pub fn subscribable(self) -> bool {
        self.notify || self.indicate
    }

    /// Picks the write procedure for a write with or without acknowledgement.
    ///
    /// The requested kind wins when supported; otherwise the one the characteristic supports is used.
    pub fn write_type(self, ack_required: bool) -> WriteType {
        match (ack_required, self.write, self.write_without_response) {
            (true, true, _) => WriteType::WithResponse,
            (false, _, true) => WriteType::WithoutResponse,
            (_, true, false) => WriteType::WithResponse,
            _ => WriteType::WithoutResponse,
        }
    }

    /// The Client Characteristic Configuration value that enables or disables pushes.
    ///
    /// Notification is preferred over indication when both are supported.
    pub fn cccd_value(self, enable: bool) -> [u8; 2] {
        match (enable, self.notify, self.indicate) {
            (true, true, _) => [0x01, 0x00],
            (true, false, true) => [0x02, 0x00],
            _ => [0x00, 0x00],
        }
    }
}

/// GATT write procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteType {
    /// Write Request, acknowledged by the peripheral
    WithResponse,
    /// Write Command, unacknowledged
    WithoutResponse,
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicDescriptor {
    #[allow(missing_docs)]
    pub uuid: Uuid,
    /// Operations the characteristic supports
    pub properties: CharacteristicProperties,
    /// UUIDs of the characteristic's descriptors, in discovery order
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicDescriptor {
    /// A characteristic without descriptors.
    pub fn new(uuid: Uuid, properties: CharacteristicProperties) -> Self {
        CharacteristicDescriptor {
            uuid,
            properties,
            descriptors: Vec::new(),
        }
    }

    /// Adds a descriptor UUID.
    pub fn with_descriptor(mut self, descriptor: Uuid) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Does the characteristic carry a Client Characteristic Configuration descriptor?
    pub fn has_cccd(&self) -> bool {
        self.descriptors
            .contains(&descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)
    }
}

/// A primary service and its characteristics, as discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

impl ServiceDescriptor {
    #[allow(missing_docs)]
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicDescriptor>) -> Self {
        ServiceDescriptor { uuid, characteristics }
    }

    /// The characteristic with the given UUID, if this service has one.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Finds a characteristic anywhere in a service tree. The first service in discovery order wins.
pub fn find_characteristic(services: &[ServiceDescriptor], uuid: Uuid) -> Option<&CharacteristicDescriptor> {
    services.iter().find_map(|s| s.characteristic(uuid))
}

/// The last known value of a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicValue {
    #[allow(missing_docs)]
    pub uuid: Uuid,
    /// The raw value
    pub value: Vec<u8>,
    /// When the value was read or notified
    pub updated_at: SystemTime,
}

/// A value observed on the link, in the shape a history store consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueRecord {
    /// Address of the peripheral
    pub address: String,
    /// The characteristic the value belongs to
    pub uuid: Uuid,
    /// The value read, written or notified
    pub value: Vec<u8>,
    #[allow(missing_docs)]
    pub timestamp: SystemTime,
}

/// Identifies one queued operation for the lifetime of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub(crate) u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A characteristic operation waiting for, or holding, the link.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    Read {
        characteristic: Uuid,
    },
    Write {
        characteristic: Uuid,
        payload: Vec<u8>,
        ack_required: bool,
    },
    SetNotification {
        characteristic: Uuid,
        enable: bool,
    },
}

impl PendingOperation {
    /// The characteristic the operation targets.
    pub fn characteristic(&self) -> Uuid {
        match self {
            PendingOperation::Read { characteristic }
            | PendingOperation::Write { characteristic, .. }
            | PendingOperation::SetNotification { characteristic, .. } => *characteristic,
        }
    }
}

impl std::fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingOperation::Read { characteristic } => write!(f, "read {characteristic}"),
            PendingOperation::Write {
                characteristic,
                payload,
                ..
            } => write!(f, "write {} bytes to {characteristic}", payload.len()),
            PendingOperation::SetNotification { characteristic, enable } => {
                let verb = if *enable { "enable" } else { "disable" };
                write!(f, "{verb} notifications on {characteristic}")
            }
        }
    }
}

/// The successful outcome of a characteristic operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutput {
    /// The value read
    Read(Vec<u8>),
    /// The write completed
    Written,
    /// Pushes are now enabled (`true`) or disabled (`false`)
    NotificationsChanged(bool),
}

impl OperationOutput {
    /// The value of a read, if this was one.
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            OperationOutput::Read(value) => Some(value),
            _ => None,
        }
    }
}
