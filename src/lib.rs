#![warn(missing_docs)]

//! Bluescan is a [Bluetooth Low Energy] (BLE) GATT client session controller for [Rust].
//!
//! A [`Session`] owns the connection to one peripheral. It drives the asynchronous GATT sequence (connect, discover
//! services, then read, write and subscribe to characteristics) as an explicit state machine, serializes
//! characteristic operations so that only one is ever outstanding on the link, and reports everything that happens on
//! an event bus any number of subscribers can listen to. Every operation a caller starts ends in exactly one terminal
//! outcome, even when the peripheral never answers or the link drops.
//!
//! The platform Bluetooth stack is not part of this crate. It is plugged in through the [`Transport`] trait, and the
//! stack's callbacks are fed back through [`TransportCallbacks`].
//!
//! [Rust]: https://www.rust-lang.org/
//! [Bluetooth Low Energy]: https://www.bluetooth.com/specifications/specs/
//!
//! # Usage
//!
//! ```rust,no_run
//!# use bluescan::btuuid::characteristics::BATTERY_LEVEL;
//!# use bluescan::{codec, DataFormat, PeripheralHandle, Session, SessionConfig, SessionEvent, Transport, Uuid, WriteType};
//!# struct Stack;
//!# #[async_trait::async_trait]
//!# impl Transport for Stack {
//!#     async fn connect(&self, _: &PeripheralHandle) -> bluescan::Result<()> { Ok(()) }
//!#     async fn disconnect(&self) -> bluescan::Result<()> { Ok(()) }
//!#     async fn discover_services(&self) -> bluescan::Result<()> { Ok(()) }
//!#     async fn read_characteristic(&self, _: Uuid) -> bluescan::Result<()> { Ok(()) }
//!#     async fn write_characteristic(&self, _: Uuid, _: &[u8], _: WriteType) -> bluescan::Result<()> { Ok(()) }
//!#     async fn set_characteristic_notification(&self, _: Uuid, _: bool) -> bluescan::Result<()> { Ok(()) }
//!#     async fn write_descriptor(&self, _: Uuid, _: Uuid, _: &[u8]) -> bluescan::Result<()> { Ok(()) }
//!# }
//!# #[tokio::main]
//!# async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!let (session, driver) = Session::new(Stack, SessionConfig::default());
//!tokio::spawn(driver.run());
//!
//!let mut events = session.subscribe();
//!session.connect(PeripheralHandle::new("C0:FF:EE:00:11:22"))?;
//!while let Some(event) = events.recv().await {
//!    match event {
//!        SessionEvent::ServicesReady(services) => {
//!            println!("{} services", services.len());
//!            break;
//!        }
//!        SessionEvent::ConnectionFailed(reason) | SessionEvent::DiscoveryFailed(reason) => {
//!            return Err(bluescan::Error::from(reason).into());
//!        }
//!        _ => {}
//!    }
//!}
//!
//!let level = session.read_characteristic(BATTERY_LEVEL)?.await?;
//!if let Some(level) = level.into_value() {
//!    println!("battery level: {}%", codec::format(&level, DataFormat::Decimal));
//!}
//!#
//!#    Ok(())
//!# }
//! ```
//!
//! # Overview
//!
//! - [`Session`]: [connecting][Session::connect], [disconnecting][Session::disconnect], the
//!   [discovered services][Session::current_services], [reads][Session::read_characteristic],
//!   [writes][Session::write_characteristic], [notifications][Session::set_notification] and the
//!   [value cache][Session::cached_value]
//! - [`queue::OperationQueue`]: the one-at-a-time FIFO behind every session
//! - [`bus::EventBus`]: best-effort publish/subscribe of [`SessionEvent`]s
//! - [`codec`]: hex, decimal, ASCII and binary renderings of attribute values, and parsing of user input
//! - [`catalog`]: names and categories of standard services and characteristics
//! - [`advertisement`]: the [`PeripheralHandle`] a scanner produces, and iBeacon/Eddystone decoding
//!
//! # Asynchronous runtimes
//!
//! Bluescan does not spawn tasks and should work with any asynchronous runtime. The [`SessionDriver`] returned by
//! [`Session::new`] must be spawned by the caller.
//!
//! # Feature flags
//!
//! The `serde` feature is available to enable serializing/deserializing peripheral handles, service trees, cached
//! values, history records and session configuration.

pub mod advertisement;
pub mod btuuid;
pub mod bus;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod gatt;
pub mod queue;
mod session;
mod transport;

pub use ::uuid::Uuid;
pub use advertisement::{Beacon, ManufacturerData, PeripheralHandle};
pub use btuuid::BluetoothUuidExt;
pub use bus::Subscription;
pub use codec::DataFormat;
pub use error::Error;
pub use gatt::{
    CharacteristicDescriptor, CharacteristicProperties, CharacteristicValue, ConnectionState, OperationId,
    OperationOutput, PendingOperation, ServiceDescriptor, ValueRecord, WriteType,
};
pub use session::{OperationHandle, Session, SessionConfig, SessionDriver, SessionEvent};
pub use transport::{Transport, TransportCallbacks};

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;
