#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluescan::btuuid::descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION as CCCD;
use bluescan::btuuid::{characteristics, services};
use bluescan::error::ErrorKind;
use bluescan::*;

/// A request the session made of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect(String),
    Disconnect,
    DiscoverServices,
    Read(Uuid),
    Write(Uuid, Vec<u8>, WriteType),
    SetNotification(Uuid, bool),
    WriteDescriptor(Uuid, Uuid, Vec<u8>),
}

struct Inner {
    callbacks: Mutex<Option<TransportCallbacks>>,
    services: Vec<ServiceDescriptor>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    refused: Mutex<HashMap<Uuid, ErrorKind>>,
    auto_link: AtomicBool,
    auto_gatt: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<Request>>,
    requests: (async_channel::Sender<Request>, async_channel::Receiver<Request>),
}

/// A scripted GATT stack.
///
/// By default it brings the link up, discovers `services`, and answers every characteristic and descriptor request
/// on a separate task, the way a platform callback thread would. Either half can be switched to manual so the test
/// fires the callbacks itself.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        MockTransport {
            inner: Arc::new(Inner {
                callbacks: Mutex::new(None),
                services,
                values: Mutex::new(HashMap::new()),
                refused: Mutex::new(HashMap::new()),
                auto_link: AtomicBool::new(true),
                auto_gatt: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
                requests: async_channel::unbounded(),
            }),
        }
    }

    pub fn attach(&self, callbacks: TransportCallbacks) {
        *self.inner.callbacks.lock().unwrap() = Some(callbacks);
    }

    pub fn callbacks(&self) -> TransportCallbacks {
        self.inner.callbacks.lock().unwrap().clone().expect("mock transport not attached")
    }

    /// Answer connect, discovery and disconnect requests automatically?
    pub fn set_auto_link(&self, auto: bool) {
        self.inner.auto_link.store(auto, Ordering::SeqCst);
    }

    /// Answer characteristic and descriptor requests automatically?
    pub fn set_auto_gatt(&self, auto: bool) {
        self.inner.auto_gatt.store(auto, Ordering::SeqCst);
    }

    /// The value automatic reads return for `uuid`.
    pub fn set_value(&self, uuid: Uuid, value: Vec<u8>) {
        self.inner.values.lock().unwrap().insert(uuid, value);
    }

    /// Makes the transport refuse requests on `uuid` outright.
    pub fn refuse(&self, uuid: Uuid, kind: ErrorKind) {
        self.inner.refused.lock().unwrap().insert(uuid, kind);
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.inner.log.lock().unwrap().clone()
    }

    /// Waits for the next request the session makes.
    pub async fn next_request(&self) -> Request {
        tokio::time::timeout(Duration::from_secs(5), self.inner.requests.1.recv())
            .await
            .expect("no request within 5s")
            .expect("request channel closed")
    }

    /// Waits until the session makes a request matching `pred`, skipping others.
    pub async fn wait_for(&self, pred: impl Fn(&Request) -> bool) -> Request {
        loop {
            let request = self.next_request().await;
            if pred(&request) {
                return request;
            }
        }
    }

    /// Reports a read result for the request in flight.
    pub fn complete_read(&self, uuid: Uuid, value: Vec<u8>, status: i32) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.callbacks().characteristic_read(uuid, value, status);
    }

    fn record(&self, request: Request) {
        self.inner.log.lock().unwrap().push(request.clone());
        let _ = self.inner.requests.0.try_send(request);
    }

    fn begin_gatt(&self, uuid: Uuid) -> Result<()> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(kind) = self.inner.refused.lock().unwrap().get(&uuid).copied() {
            self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::with_message(kind, "refused by mock"));
        }
        Ok(())
    }

    fn reply_link(&self, f: impl FnOnce(&TransportCallbacks) + Send + 'static) {
        if !self.inner.auto_link.load(Ordering::SeqCst) {
            return;
        }
        let callbacks = self.callbacks();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            f(&callbacks);
        });
    }

    fn reply_gatt(&self, f: impl FnOnce(&TransportCallbacks) + Send + 'static) {
        if !self.inner.auto_gatt.load(Ordering::SeqCst) {
            return;
        }
        let callbacks = self.callbacks();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            f(&callbacks);
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        self.record(Request::Connect(peripheral.address.clone()));
        self.reply_link(|cb| cb.connection_state_changed(0, true));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(Request::Disconnect);
        self.reply_link(|cb| cb.connection_state_changed(0, false));
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        self.record(Request::DiscoverServices);
        let services = self.inner.services.clone();
        self.reply_link(move |cb| cb.services_discovered(0, services));
        Ok(())
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<()> {
        self.record(Request::Read(characteristic));
        self.begin_gatt(characteristic)?;
        let value = self
            .inner
            .values
            .lock()
            .unwrap()
            .get(&characteristic)
            .cloned()
            .unwrap_or_default();
        self.reply_gatt(move |cb| cb.characteristic_read(characteristic, value, 0));
        Ok(())
    }

    async fn write_characteristic(&self, characteristic: Uuid, value: &[u8], write_type: WriteType) -> Result<()> {
        self.record(Request::Write(characteristic, value.to_vec(), write_type));
        self.begin_gatt(characteristic)?;
        self.reply_gatt(move |cb| cb.characteristic_written(characteristic, 0));
        Ok(())
    }

    async fn set_characteristic_notification(&self, characteristic: Uuid, enabled: bool) -> Result<()> {
        self.record(Request::SetNotification(characteristic, enabled));
        Ok(())
    }

    async fn write_descriptor(&self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) -> Result<()> {
        self.record(Request::WriteDescriptor(characteristic, descriptor, value.to_vec()));
        self.begin_gatt(characteristic)?;
        self.reply_gatt(move |cb| cb.descriptor_written(characteristic, descriptor, 0));
        Ok(())
    }
}

pub const PERIPHERAL: &str = "C0:FF:EE:00:11:22";

pub const INDICATE_ONLY: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const NOTIFY_AND_INDICATE: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
pub const NOTIFY_WITHOUT_CCCD: Uuid = Uuid::from_u128(0x6e400004_b5a3_f393_e0a9_e50e24dcca9e);
pub const WRITE_COMMAND_ONLY: Uuid = Uuid::from_u128(0x6e400005_b5a3_f393_e0a9_e50e24dcca9e);
pub const CUSTOM_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

pub fn props(f: impl FnOnce(&mut CharacteristicProperties)) -> CharacteristicProperties {
    let mut props = CharacteristicProperties::default();
    f(&mut props);
    props
}

/// Battery Service with a readable Battery Level.
pub fn battery_service() -> ServiceDescriptor {
    ServiceDescriptor::new(
        services::BATTERY,
        vec![CharacteristicDescriptor::new(
            characteristics::BATTERY_LEVEL,
            props(|p| {
                p.read = true;
                p.notify = true;
            }),
        )
        .with_descriptor(CCCD)],
    )
}

/// Battery, Heart Rate and a vendor service covering every capability combination the tests need.
pub fn full_tree() -> Vec<ServiceDescriptor> {
    vec![
        battery_service(),
        ServiceDescriptor::new(
            services::HEART_RATE,
            vec![
                CharacteristicDescriptor::new(characteristics::HEART_RATE_MEASUREMENT, props(|p| p.notify = true))
                    .with_descriptor(CCCD),
                CharacteristicDescriptor::new(characteristics::HEART_RATE_CONTROL_POINT, props(|p| p.write = true)),
            ],
        ),
        ServiceDescriptor::new(
            CUSTOM_SERVICE,
            vec![
                CharacteristicDescriptor::new(INDICATE_ONLY, props(|p| p.indicate = true)).with_descriptor(CCCD),
                CharacteristicDescriptor::new(
                    NOTIFY_AND_INDICATE,
                    props(|p| {
                        p.notify = true;
                        p.indicate = true;
                    }),
                )
                .with_descriptor(CCCD),
                CharacteristicDescriptor::new(NOTIFY_WITHOUT_CCCD, props(|p| p.notify = true)),
                CharacteristicDescriptor::new(WRITE_COMMAND_ONLY, props(|p| p.write_without_response = true)),
            ],
        ),
    ]
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates a session on `mock` and spawns its driver.
pub fn start(mock: &MockTransport, config: SessionConfig) -> Session {
    init_tracing();
    let (session, driver) = Session::new(mock.clone(), config);
    mock.attach(session.callbacks());
    tokio::spawn(driver.run());
    session
}

pub async fn next_event(events: &mut Subscription<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within 5s")
        .expect("event bus closed")
}

/// Waits for the first event `pred` accepts, skipping others.
pub async fn wait_event(
    events: &mut Subscription<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Waits for the session to reach `state`.
pub async fn wait_state(events: &mut Subscription<SessionEvent>, state: ConnectionState) {
    wait_event(events, |e| matches!(e, SessionEvent::StateChanged { new, .. } if *new == state)).await;
}

/// Connects `session` to [`PERIPHERAL`] and waits for discovery to finish.
pub async fn connect_ready(session: &Session) -> Subscription<SessionEvent> {
    let mut events = session.subscribe();
    session.connect(PeripheralHandle::new(PERIPHERAL)).unwrap();
    wait_event(&mut events, |e| matches!(e, SessionEvent::ServicesReady(_))).await;
    assert_eq!(session.state(), ConnectionState::Ready);
    events
}
