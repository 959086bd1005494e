//! The seam between a [`Session`][crate::Session] and a platform GATT stack.
//!
//! Platform stacks are asynchronous in two steps: a request is accepted or refused right away, and its result
//! arrives later on a stack-owned callback thread. [`Transport`] covers the first step and
//! [`TransportCallbacks`] the second. The session issues at most one characteristic or descriptor request at a time
//! and waits for its callback before issuing the next one.

use async_channel::WeakSender;
use async_trait::async_trait;
use tracing::trace;
use uuid::Uuid;

use crate::advertisement::PeripheralHandle;
use crate::gatt::{ServiceDescriptor, WriteType};
use crate::session::Message;
use crate::Result;

/// Requests a session can make of a platform GATT stack.
///
/// Every method returns once the stack has accepted or refused the request. An `Err` means the request will never
/// produce a callback.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a link to `peripheral`. Answered by [`TransportCallbacks::connection_state_changed`].
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()>;

    /// Closes the link, or abandons a pending connection attempt. Answered by
    /// [`TransportCallbacks::connection_state_changed`] with `connected == false`.
    async fn disconnect(&self) -> Result<()>;

    /// Enumerates services. Answered by [`TransportCallbacks::services_discovered`].
    async fn discover_services(&self) -> Result<()>;

    /// Answered by [`TransportCallbacks::characteristic_read`].
    async fn read_characteristic(&self, characteristic: Uuid) -> Result<()>;

    /// Answered by [`TransportCallbacks::characteristic_written`], for both write types.
    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8], write_type: WriteType) -> Result<()>;

    /// Registers locally for pushes on `characteristic`. Completes synchronously; there is no callback.
    async fn set_characteristic_notification(&self, characteristic: Uuid, enabled: bool) -> Result<()>;

    /// Answered by [`TransportCallbacks::descriptor_written`].
    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<()>;
}

/// Results reported by the platform stack.
#[derive(Debug, Clone)]
pub(crate) enum Callback {
    ConnectionStateChanged {
        status: i32,
        connected: bool,
    },
    ServicesDiscovered {
        status: i32,
        services: Vec<ServiceDescriptor>,
    },
    CharacteristicRead {
        characteristic: Uuid,
        value: Vec<u8>,
        status: i32,
    },
    CharacteristicWritten {
        characteristic: Uuid,
        status: i32,
    },
    DescriptorWritten {
        characteristic: Uuid,
        descriptor: Uuid,
        status: i32,
    },
    CharacteristicChanged {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Handle through which platform glue reports GATT callbacks to a session.
///
/// Status codes follow the ATT convention: `0` is success, anything else is an error code. Every method returns
/// immediately. Callbacks delivered after the session has gone away are discarded.
#[derive(Clone)]
pub struct TransportCallbacks {
    mailbox: WeakSender<Message>,
}

impl std::fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCallbacks").finish_non_exhaustive()
    }
}

impl TransportCallbacks {
    pub(crate) fn new(mailbox: WeakSender<Message>) -> Self {
        TransportCallbacks { mailbox }
    }

    fn deliver(&self, callback: Callback) {
        match self.mailbox.upgrade() {
            Some(mailbox) => {
                if mailbox.try_send(Message::Callback(callback)).is_err() {
                    trace!("session stopped; callback discarded");
                }
            }
            None => trace!("session dropped; callback discarded"),
        }
    }

    /// The link went up (`connected`) or down, or a connection attempt failed (`status != 0`).
    pub fn connection_state_changed(&self, status: i32, connected: bool) {
        self.deliver(Callback::ConnectionStateChanged { status, connected });
    }

    /// Service discovery finished. `services` is ignored unless `status == 0`.
    pub fn services_discovered(&self, status: i32, services: Vec<ServiceDescriptor>) {
        self.deliver(Callback::ServicesDiscovered { status, services });
    }

    /// A read finished. `value` is ignored unless `status == 0`.
    pub fn characteristic_read(&self, characteristic: Uuid, value: Vec<u8>, status: i32) {
        self.deliver(Callback::CharacteristicRead {
            characteristic,
            value,
            status,
        });
    }

    /// A write finished, with or without response.
    pub fn characteristic_written(&self, characteristic: Uuid, status: i32) {
        self.deliver(Callback::CharacteristicWritten { characteristic, status });
    }

    /// A descriptor write finished.
    pub fn descriptor_written(&self, characteristic: Uuid, descriptor: Uuid, status: i32) {
        self.deliver(Callback::DescriptorWritten {
            characteristic,
            descriptor,
            status,
        });
    }

    /// The peripheral pushed a new value by notification or indication.
    pub fn characteristic_changed(&self, characteristic: Uuid, value: Vec<u8>) {
        self.deliver(Callback::CharacteristicChanged { characteristic, value });
    }
}
