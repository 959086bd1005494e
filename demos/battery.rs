use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluescan::btuuid::characteristics::BATTERY_LEVEL;
use bluescan::btuuid::{descriptors, services};
use bluescan::*;
use tracing::{info, metadata::LevelFilter, warn};

/// An in-process peripheral exposing a Battery Service, answering each request after a short delay.
#[derive(Clone, Default)]
struct SimulatedBattery {
    callbacks: Arc<Mutex<Option<TransportCallbacks>>>,
    level: Arc<Mutex<u8>>,
}

impl SimulatedBattery {
    fn later(&self, f: impl FnOnce(&TransportCallbacks) + Send + 'static) -> Result<()> {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap()
            .clone()
            .ok_or(error::ErrorKind::NotConnected)?;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f(&callbacks);
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for SimulatedBattery {
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        info!("radio: connecting to {}", peripheral.display_name());
        self.later(|cb| cb.connection_state_changed(0, true))
    }

    async fn disconnect(&self) -> Result<()> {
        self.later(|cb| cb.connection_state_changed(0, false))
    }

    async fn discover_services(&self) -> Result<()> {
        let level = CharacteristicDescriptor::new(BATTERY_LEVEL, CharacteristicProperties::from_bits(0x12))
            .with_descriptor(descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION);
        let tree = vec![ServiceDescriptor::new(services::BATTERY, vec![level])];
        self.later(move |cb| cb.services_discovered(0, tree))
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<()> {
        let level = *self.level.lock().unwrap();
        self.later(move |cb| cb.characteristic_read(characteristic, vec![level], 0))
    }

    async fn write_characteristic(&self, characteristic: Uuid, _: &[u8], _: WriteType) -> Result<()> {
        self.later(move |cb| cb.characteristic_written(characteristic, 0))
    }

    async fn set_characteristic_notification(&self, _: Uuid, _: bool) -> Result<()> {
        Ok(())
    }

    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<()> {
        let enabled = value != [0, 0];
        let level = self.level.clone();
        self.later(move |cb| {
            cb.descriptor_written(characteristic, descriptor, 0);
            if enabled {
                // drain a little charge so there is something to notify
                let mut level = level.lock().unwrap();
                *level = level.saturating_sub(1);
                cb.characteristic_changed(characteristic, vec![*level]);
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let radio = SimulatedBattery::default();
    *radio.level.lock().unwrap() = 100;
    let (session, driver) = Session::new(radio.clone(), SessionConfig::default().with_history_records(true));
    *radio.callbacks.lock().unwrap() = Some(session.callbacks());
    tokio::spawn(driver.run());

    let mut events = session.subscribe();
    let mut peripheral = PeripheralHandle::new("C0:FF:EE:00:11:22");
    peripheral.advertised_name = Some("Demo Battery".into());
    session.connect(peripheral)?;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged { old, new } => info!("{} -> {}", old, new),
            SessionEvent::ServicesReady(services) => {
                for service in services.iter() {
                    info!("service {}", catalog::lookup(&service.uuid.to_string()));
                    for characteristic in &service.characteristics {
                        info!("  characteristic {}", catalog::lookup(&characteristic.uuid.to_string()));
                    }
                }
                break;
            }
            SessionEvent::ConnectionFailed(reason) | SessionEvent::DiscoveryFailed(reason) => {
                return Err(bluescan::Error::from(reason).into())
            }
            _ => {}
        }
    }

    let level = session.read_characteristic(BATTERY_LEVEL)?.await?;
    if let Some(level) = level.into_value() {
        info!(
            "battery level: {}% (0x{})",
            codec::format(&level, DataFormat::Decimal),
            codec::format(&level, DataFormat::Hex)
        );
    }

    if let Err(err) = session.write_characteristic(BATTERY_LEVEL, [0], true) {
        warn!("write rejected: {}", err);
    }

    let mut records = session.records();
    session.set_notification(BATTERY_LEVEL, true)?.await?;
    if let Some(record) = records.recv().await {
        info!("notified {:?} from {}", record.value, record.address);
    }

    session.disconnect();
    while let Some(event) = events.recv().await {
        if let SessionEvent::StateChanged { new: ConnectionState::Disconnected, .. } = event {
            break;
        }
    }
    info!("done");
    Ok(())
}
