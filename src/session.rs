//! The connection session: one link to one peripheral, driven as an explicit state machine.
//!
//! A session is split in two halves. [`Session`] is the cheap, clonable handle callers hold; it validates requests
//! synchronously against the last published snapshot of the session and forwards them to the driver. The
//! [`SessionDriver`] owns the state machine and the [`OperationQueue`] and processes requests and transport callbacks
//! one at a time from a single mailbox. It must be spawned on an executor of the caller's choosing:
//!
//! ```ignore
//! let (session, driver) = Session::new(transport, SessionConfig::default());
//! tokio::spawn(driver.run());
//! ```
//!
//! When every [`Session`] clone has been dropped, the driver closes the link and [`SessionDriver::run`] returns.
//!
//! # Teardown
//!
//! Queued operations are cancelled as soon as a disconnect is requested. The operation in flight at that moment may
//! still complete while the session is [`Disconnecting`][ConnectionState::Disconnecting]; if it has not by the time
//! the link is confirmed down, it resolves to [`ErrorKind::Cancelled`]. An unsolicited link loss cancels it at once.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};

use async_channel::{Receiver, Sender};
use futures_channel::oneshot;
use futures_lite::FutureExt;
use futures_timer::Delay;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::advertisement::PeripheralHandle;
use crate::btuuid::descriptors;
use crate::bus::{EventBus, Subscription};
use crate::error::{status_check, AttError, ErrorKind};
use crate::gatt::{
    find_characteristic, CharacteristicDescriptor, CharacteristicProperties, CharacteristicValue, ConnectionState,
    OperationId, OperationOutput, PendingOperation, ServiceDescriptor, ValueRecord,
};
use crate::queue::{OperationQueue, QueuedOperation};
use crate::transport::{Callback, Transport, TransportCallbacks};
use crate::{Error, Result};

/// Timeouts and buffer sizes for a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// How long an operation may hold the link before it resolves to [`ErrorKind::Timeout`]
    pub operation_timeout: Duration,
    /// How long the transport may take to report the link up
    pub connect_timeout: Duration,
    /// How long service discovery may take
    pub discovery_timeout: Duration,
    /// How long to wait for the transport to confirm a requested disconnect
    pub disconnect_timeout: Duration,
    /// Events buffered per subscriber before the oldest are dropped
    pub event_capacity: usize,
    /// Publish a [`ValueRecord`] for every value read, written or notified
    pub history_records: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            operation_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(5),
            event_capacity: 128,
            history_records: false,
        }
    }
}

impl SessionConfig {
    /// Sets [`SessionConfig::operation_timeout`].
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets [`SessionConfig::connect_timeout`].
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets [`SessionConfig::discovery_timeout`].
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Sets [`SessionConfig::disconnect_timeout`].
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Sets [`SessionConfig::event_capacity`].
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets [`SessionConfig::history_records`].
    pub fn with_history_records(mut self, enabled: bool) -> Self {
        self.history_records = enabled;
        self
    }
}

/// Everything a session reports to its subscribers.
///
/// Each state transition produces one `StateChanged`. Each operation produces exactly one of
/// `CharacteristicRead`, `CharacteristicWritten`, `NotificationStateChanged` or `OperationFailed`.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    /// Discovery finished; the same list [`Session::current_services`] returns from now on
    ServicesReady(Arc<[ServiceDescriptor]>),
    /// The link never came up
    ConnectionFailed(ErrorKind),
    /// Discovery failed or the link dropped during discovery
    DiscoveryFailed(ErrorKind),
    CharacteristicRead {
        id: OperationId,
        uuid: Uuid,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        id: OperationId,
        uuid: Uuid,
    },
    NotificationStateChanged {
        id: OperationId,
        uuid: Uuid,
        enabled: bool,
    },
    /// A value pushed by the peripheral
    CharacteristicChanged {
        uuid: Uuid,
        value: Vec<u8>,
    },
    OperationFailed {
        id: OperationId,
        reason: ErrorKind,
    },
}

impl SessionEvent {
    /// The operation this event terminates, if any.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            SessionEvent::CharacteristicRead { id, .. }
            | SessionEvent::CharacteristicWritten { id, .. }
            | SessionEvent::NotificationStateChanged { id, .. }
            | SessionEvent::OperationFailed { id, .. } => Some(*id),
            _ => None,
        }
    }
}

type Responder = oneshot::Sender<Result<OperationOutput>>;

pub(crate) enum Message {
    Connect(PeripheralHandle),
    Disconnect,
    Enqueue {
        id: OperationId,
        operation: PendingOperation,
        responder: Responder,
    },
    Callback(Callback),
}

#[derive(Default)]
struct Snapshot {
    state: ConnectionState,
    peripheral: Option<PeripheralHandle>,
    services: Option<Arc<[ServiceDescriptor]>>,
    values: HashMap<Uuid, CharacteristicValue>,
}

struct Shared {
    config: SessionConfig,
    snapshot: Mutex<Snapshot>,
    events: EventBus<SessionEvent>,
    records: EventBus<ValueRecord>,
    next_id: AtomicU64,
}

impl Shared {
    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A connection to a single peripheral.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    mailbox: Sender<Message>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.shared.snapshot();
        f.debug_struct("Session")
            .field("state", &snapshot.state)
            .field("peripheral", &snapshot.peripheral.as_ref().map(|p| &p.address))
            .finish()
    }
}

impl Session {
    /// Creates a disconnected session on top of `transport`.
    ///
    /// The returned driver does all the work and must be spawned. Platform glue reports GATT callbacks through
    /// [`Session::callbacks`].
    pub fn new<T: Transport>(transport: T, config: SessionConfig) -> (Session, SessionDriver) {
        let (sender, receiver) = async_channel::unbounded();
        let shared = Arc::new(Shared {
            events: EventBus::new(config.event_capacity),
            records: EventBus::new(config.event_capacity),
            snapshot: Mutex::default(),
            next_id: AtomicU64::new(1),
            config,
        });
        let driver = SessionDriver {
            transport: Box::new(transport),
            queue: OperationQueue::new(shared.config.operation_timeout),
            shared: shared.clone(),
            mailbox: receiver,
            state: ConnectionState::Disconnected,
            peripheral: None,
            services: None,
            phase_deadline: None,
            reconnect: None,
            awaiting_link_down: false,
        };
        (
            Session {
                shared,
                mailbox: sender,
            },
            driver,
        )
    }

    /// The handle through which the platform stack reports results to this session.
    pub fn callbacks(&self) -> TransportCallbacks {
        TransportCallbacks::new(self.mailbox.downgrade())
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Starts connecting to `peripheral`.
    ///
    /// The first call binds the session to the peripheral's address for the rest of its life. Connecting again to
    /// the same address while a link is up or being established does nothing; connecting to a different address
    /// fails with [`ErrorKind::AlreadyConnectedElsewhere`]. A connect issued while the link is being torn down
    /// takes effect once teardown completes. Progress is reported on the event bus.
    pub fn connect(&self, peripheral: PeripheralHandle) -> Result<()> {
        let mut snapshot = self.shared.snapshot();
        if let Some(bound) = &snapshot.peripheral {
            if bound.address != peripheral.address {
                return Err(Error::with_message(
                    ErrorKind::AlreadyConnectedElsewhere,
                    format!("session is bound to {}", bound.address),
                ));
            }
        }
        // the snapshot may predate a queued disconnect, so duplicates are left to the driver
        snapshot.peripheral = Some(peripheral.clone());
        drop(snapshot);
        self.send(Message::Connect(peripheral));
        Ok(())
    }

    /// Requests teardown of the link. Safe to call in any state.
    pub fn disconnect(&self) {
        self.send(Message::Disconnect);
    }

    /// The current state, as last published by the driver.
    pub fn state(&self) -> ConnectionState {
        self.shared.snapshot().state
    }

    /// The peripheral this session is bound to.
    pub fn peripheral(&self) -> Option<PeripheralHandle> {
        self.shared.snapshot().peripheral.clone()
    }

    /// The discovered services, only while the session is [`Ready`][ConnectionState::Ready].
    pub fn current_services(&self) -> Option<Arc<[ServiceDescriptor]>> {
        let snapshot = self.shared.snapshot();
        match snapshot.state {
            ConnectionState::Ready => snapshot.services.clone(),
            _ => None,
        }
    }

    /// Queues a read of `characteristic`.
    ///
    /// Fails with [`ErrorKind::NotReady`] outside the `Ready` state and with [`ErrorKind::UnsupportedOperation`]
    /// when the characteristic was not discovered or is not readable. In both cases nothing is queued.
    pub fn read_characteristic(&self, characteristic: Uuid) -> Result<OperationHandle> {
        self.validate(characteristic, "reading", |c| c.properties.read)?;
        Ok(self.enqueue(PendingOperation::Read { characteristic }))
    }

    /// Queues a write of `value` to `characteristic`.
    ///
    /// The characteristic must support at least one write type. `ack_required` selects a write request over a
    /// write command when the characteristic supports both.
    pub fn write_characteristic(
        &self,
        characteristic: Uuid,
        value: impl Into<Vec<u8>>,
        ack_required: bool,
    ) -> Result<OperationHandle> {
        self.validate(characteristic, "writing", |c| c.properties.writable())?;
        Ok(self.enqueue(PendingOperation::Write {
            characteristic,
            payload: value.into(),
            ack_required,
        }))
    }

    /// Queues enabling or disabling notifications (or indications) on `characteristic`.
    ///
    /// The characteristic must support notify or indicate and carry a Client Characteristic Configuration
    /// descriptor.
    pub fn set_notification(&self, characteristic: Uuid, enabled: bool) -> Result<OperationHandle> {
        self.validate(characteristic, "notifications", |c| {
            c.properties.subscribable() && c.has_cccd()
        })?;
        Ok(self.enqueue(PendingOperation::SetNotification {
            characteristic,
            enable: enabled,
        }))
    }

    /// The last value read or notified for `characteristic` during the current connection.
    pub fn cached_value(&self, characteristic: Uuid) -> Option<CharacteristicValue> {
        self.shared.snapshot().values.get(&characteristic).cloned()
    }

    /// Every cached value, ordered by UUID.
    pub fn cached_values(&self) -> Vec<CharacteristicValue> {
        let mut values: Vec<_> = self.shared.snapshot().values.values().cloned().collect();
        values.sort_by_key(|v| v.uuid);
        values
    }

    /// Subscribes to session events published from now on.
    pub fn subscribe(&self) -> Subscription<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribes to history records. Nothing is published unless [`SessionConfig::history_records`] is set.
    pub fn records(&self) -> Subscription<ValueRecord> {
        self.shared.records.subscribe()
    }

    fn validate(
        &self,
        characteristic: Uuid,
        capability: &str,
        supports: impl FnOnce(&CharacteristicDescriptor) -> bool,
    ) -> Result<()> {
        let snapshot = self.shared.snapshot();
        let services = match (snapshot.state, &snapshot.services) {
            (ConnectionState::Ready, Some(services)) => services,
            (state, _) => {
                return Err(Error::with_message(
                    ErrorKind::NotReady,
                    format!("session is {state}"),
                ))
            }
        };
        let Some(found) = find_characteristic(services, characteristic) else {
            return Err(Error::with_message(
                ErrorKind::UnsupportedOperation,
                format!("characteristic {characteristic} not found"),
            ));
        };
        if supports(found) {
            Ok(())
        } else {
            Err(Error::with_message(
                ErrorKind::UnsupportedOperation,
                format!("characteristic {characteristic} does not support {capability}"),
            ))
        }
    }

    fn enqueue(&self, operation: PendingOperation) -> OperationHandle {
        let id = OperationId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (responder, receiver) = oneshot::channel();
        debug!("queueing {} ({})", id, operation);
        self.send(Message::Enqueue {
            id,
            operation,
            responder,
        });
        OperationHandle { id, receiver }
    }

    fn send(&self, message: Message) {
        // a dropped message drops its responder, which resolves the handle to `Cancelled`
        if self.mailbox.try_send(message).is_err() {
            debug!("session driver is not running; request dropped");
        }
    }
}

/// The pending outcome of a queued characteristic operation.
///
/// Resolves once the operation reaches its terminal state. Dropping the handle does not cancel the operation; its
/// outcome is still published on the event bus.
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    receiver: oneshot::Receiver<Result<OperationOutput>>,
}

impl OperationHandle {
    /// The identifier carried by this operation's events.
    pub fn id(&self) -> OperationId {
        self.id
    }
}

impl Future for OperationHandle {
    type Output = Result<OperationOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(cancelled("session driver stopped"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn cancelled(message: &str) -> Error {
    Error::with_message(ErrorKind::Cancelled, message)
}

enum Wake {
    Message(Option<Message>),
    Deadline,
}

/// The task that drives a [`Session`]. See [`SessionDriver::run`].
pub struct SessionDriver {
    transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    mailbox: Receiver<Message>,
    state: ConnectionState,
    peripheral: Option<PeripheralHandle>,
    services: Option<Arc<[ServiceDescriptor]>>,
    queue: OperationQueue<Responder>,
    // connect, discovery or disconnect deadline, depending on the state
    phase_deadline: Option<Instant>,
    // connect requested while a disconnect is still unconfirmed
    reconnect: Option<PeripheralHandle>,
    // a disconnect issued after a failed connect or discovery has not been confirmed yet
    awaiting_link_down: bool,
}

impl SessionDriver {
    /// Processes requests, callbacks and deadlines until every [`Session`] handle is dropped.
    pub async fn run(mut self) {
        debug!("session driver started");
        loop {
            let wake = match self.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    let mailbox = &self.mailbox;
                    async { Wake::Message(mailbox.recv().await.ok()) }
                        .or(async {
                            Delay::new(timeout).await;
                            Wake::Deadline
                        })
                        .await
                }
                None => Wake::Message(self.mailbox.recv().await.ok()),
            };
            match wake {
                Wake::Message(Some(message)) => self.handle(message).await,
                Wake::Message(None) => break,
                Wake::Deadline => self.on_deadline().await,
            }
        }
        self.shutdown().await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.queue.deadline(), self.phase_deadline].into_iter().flatten().min()
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Connect(peripheral) => self.on_connect_request(peripheral).await,
            Message::Disconnect => self.on_disconnect_request().await,
            Message::Enqueue {
                id,
                operation,
                responder,
            } => {
                let entry = QueuedOperation {
                    id,
                    operation,
                    responder,
                };
                if self.state != ConnectionState::Ready {
                    // validated against a snapshot taken before teardown started
                    self.finish(entry, Err(cancelled("session is no longer ready")));
                    return;
                }
                self.queue.enqueue(entry.id, entry.operation, entry.responder);
                self.dispatch().await;
            }
            Message::Callback(callback) => self.on_callback(callback).await,
        }
    }

    async fn on_connect_request(&mut self, peripheral: PeripheralHandle) {
        match self.state {
            ConnectionState::Disconnected if self.awaiting_link_down => {
                debug!("connect to {} deferred until the previous link is closed", peripheral.address);
                self.reconnect = Some(peripheral);
            }
            ConnectionState::Disconnected => self.start_connect(peripheral).await,
            ConnectionState::Disconnecting => {
                debug!("connect to {} deferred until teardown completes", peripheral.address);
                self.reconnect = Some(peripheral);
            }
            state => debug!("connect ignored while {}", state),
        }
    }

    async fn start_connect(&mut self, peripheral: PeripheralHandle) {
        info!("connecting to {}", peripheral.address);
        self.set_state(ConnectionState::Connecting);
        self.phase_deadline = Some(Instant::now() + self.shared.config.connect_timeout);
        let result = self.transport.connect(&peripheral).await;
        self.peripheral = Some(peripheral);
        if let Err(err) = result {
            warn!("connect request refused: {}", err);
            self.fail_connect(err.kind());
        }
    }

    fn fail_connect(&mut self, reason: ErrorKind) {
        self.phase_deadline = None;
        self.set_state(ConnectionState::Disconnected);
        self.publish(SessionEvent::ConnectionFailed(reason));
    }

    async fn on_disconnect_request(&mut self) {
        self.reconnect = None;
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                debug!("disconnect ignored while {}", self.state)
            }
            _ => self.begin_teardown().await,
        }
    }

    async fn begin_teardown(&mut self) {
        info!("disconnecting");
        self.set_state(ConnectionState::Disconnecting);
        self.cancel_queued();
        self.phase_deadline = Some(Instant::now() + self.shared.config.disconnect_timeout);
        if let Err(err) = self.transport.disconnect().await {
            warn!("disconnect request refused: {}", err);
            self.finish_teardown().await;
        }
    }

    async fn finish_teardown(&mut self) {
        self.phase_deadline = None;
        self.services = None;
        {
            let mut snapshot = self.shared.snapshot();
            snapshot.services = None;
            snapshot.values.clear();
        }
        self.set_state(ConnectionState::Disconnected);
        if let Some(entry) = self.queue.complete() {
            self.finish(entry, Err(cancelled("link closed")));
        }
        self.cancel_queued();
        if let Some(peripheral) = self.reconnect.take() {
            self.start_connect(peripheral).await;
        }
    }

    async fn on_link_lost(&mut self) {
        warn!("link lost while {}", self.state);
        let was_discovering = self.state == ConnectionState::Discovering;
        self.finish_teardown().await;
        if was_discovering {
            self.publish(SessionEvent::DiscoveryFailed(ErrorKind::NotConnected));
        }
    }

    async fn begin_discovery(&mut self) {
        self.set_state(ConnectionState::Discovering);
        self.phase_deadline = Some(Instant::now() + self.shared.config.discovery_timeout);
        if let Err(err) = self.transport.discover_services().await {
            warn!("service discovery request refused: {}", err);
            self.fail_discovery(err.kind()).await;
        }
    }

    async fn fail_discovery(&mut self, reason: ErrorKind) {
        self.phase_deadline = None;
        self.set_state(ConnectionState::Disconnected);
        self.publish(SessionEvent::DiscoveryFailed(reason));
        match self.transport.disconnect().await {
            Ok(()) => self.await_link_down(),
            Err(err) => debug!("disconnect after failed discovery refused: {}", err),
        }
    }

    /// Holds back new connection attempts until the transport confirms a disconnect issued while already
    /// `Disconnected`, so that the confirmation is not mistaken for the failure of the next attempt.
    fn await_link_down(&mut self) {
        self.awaiting_link_down = true;
        self.phase_deadline = Some(Instant::now() + self.shared.config.disconnect_timeout);
    }

    async fn link_down_confirmed(&mut self) {
        self.awaiting_link_down = false;
        self.phase_deadline = None;
        if let Some(peripheral) = self.reconnect.take() {
            self.start_connect(peripheral).await;
        }
    }

    async fn on_callback(&mut self, callback: Callback) {
        match callback {
            Callback::ConnectionStateChanged { status, connected } => {
                self.on_connection_state_changed(status, connected).await
            }
            Callback::ServicesDiscovered { status, services } => self.on_services_discovered(status, services).await,
            Callback::CharacteristicRead {
                characteristic,
                value,
                status,
            } => {
                let outcome = status_check(status).map(|()| OperationOutput::Read(value));
                self.resolve(
                    |op| matches!(op, PendingOperation::Read { characteristic: c } if *c == characteristic),
                    outcome,
                )
                .await
            }
            Callback::CharacteristicWritten { characteristic, status } => {
                let outcome = status_check(status).map(|()| OperationOutput::Written);
                self.resolve(
                    |op| matches!(op, PendingOperation::Write { characteristic: c, .. } if *c == characteristic),
                    outcome,
                )
                .await
            }
            Callback::DescriptorWritten {
                characteristic,
                descriptor,
                status,
            } => {
                let enabled = match self.queue.in_flight().map(|e| &e.operation) {
                    Some(PendingOperation::SetNotification { enable, .. }) => *enable,
                    _ => false,
                };
                let outcome = status_check(status).map(|()| OperationOutput::NotificationsChanged(enabled));
                self.resolve(
                    |op| {
                        descriptor == descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION
                            && matches!(op, PendingOperation::SetNotification { characteristic: c, .. } if *c == characteristic)
                    },
                    outcome,
                )
                .await
            }
            Callback::CharacteristicChanged { characteristic, value } => {
                self.on_characteristic_changed(characteristic, value)
            }
        }
    }

    async fn on_connection_state_changed(&mut self, status: i32, connected: bool) {
        let outcome = status_check(status);
        let link_up = connected && outcome.is_ok();
        match (self.state, link_up) {
            (ConnectionState::Disconnected, false) if self.awaiting_link_down => {
                debug!("previous link closed");
                self.link_down_confirmed().await;
            }
            (ConnectionState::Connecting, true) => {
                info!("link up");
                self.set_state(ConnectionState::Connected);
                self.begin_discovery().await;
            }
            (ConnectionState::Connecting, false) => {
                let reason = match outcome {
                    Err(err) => ErrorKind::Transport(err),
                    Ok(()) => ErrorKind::ConnectionFailed,
                };
                warn!("connection failed: {}", reason);
                self.fail_connect(reason);
            }
            (ConnectionState::Disconnecting, false) => {
                info!("link closed");
                self.finish_teardown().await;
            }
            (ConnectionState::Connected | ConnectionState::Discovering | ConnectionState::Ready, false) => {
                self.on_link_lost().await
            }
            (state, up) => debug!("link {} reported while {}; ignored", if up { "up" } else { "down" }, state),
        }
    }

    async fn on_services_discovered(&mut self, status: i32, services: Vec<ServiceDescriptor>) {
        if self.state != ConnectionState::Discovering {
            debug!("service discovery result ignored while {}", self.state);
            return;
        }
        match status_check(status) {
            Ok(()) => {
                let services: Arc<[ServiceDescriptor]> = services.into();
                info!("discovered {} services", services.len());
                self.phase_deadline = None;
                self.services = Some(services.clone());
                self.shared.snapshot().services = Some(services.clone());
                self.set_state(ConnectionState::Ready);
                self.publish(SessionEvent::ServicesReady(services));
                self.dispatch().await;
            }
            Err(err) => {
                warn!("service discovery failed: {}", err);
                self.fail_discovery(ErrorKind::Transport(err)).await;
            }
        }
    }

    fn on_characteristic_changed(&mut self, characteristic: Uuid, value: Vec<u8>) {
        if !matches!(self.state, ConnectionState::Ready | ConnectionState::Disconnecting) {
            debug!("notification from {} ignored while {}", characteristic, self.state);
            return;
        }
        self.remember(characteristic, &value);
        self.publish(SessionEvent::CharacteristicChanged {
            uuid: characteristic,
            value,
        });
    }

    /// Completes the in-flight operation if `expected` recognizes it as the one the callback answers.
    async fn resolve(
        &mut self,
        expected: impl FnOnce(&PendingOperation) -> bool,
        outcome: Result<OperationOutput, AttError>,
    ) {
        if !self.queue.in_flight().is_some_and(|e| expected(&e.operation)) {
            // e.g. the late answer to an operation that already timed out
            debug!("callback does not match the operation in flight; ignored");
            return;
        }
        let Some(entry) = self.queue.complete() else {
            return;
        };
        match (&entry.operation, &outcome) {
            (PendingOperation::Read { characteristic }, Ok(OperationOutput::Read(value))) => {
                self.remember(*characteristic, value)
            }
            (PendingOperation::Write { characteristic, payload, .. }, Ok(_)) => {
                self.record(*characteristic, payload, SystemTime::now())
            }
            _ => {}
        }
        self.finish(entry, outcome.map_err(Error::from));
        self.dispatch().await;
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        if let Some(entry) = self.queue.expire(now) {
            warn!("{} ({}) timed out", entry.id, entry.operation);
            self.finish(
                entry,
                Err(Error::with_message(ErrorKind::Timeout, "no response from peripheral")),
            );
            self.dispatch().await;
        }
        if !self.phase_deadline.is_some_and(|deadline| deadline <= now) {
            return;
        }
        self.phase_deadline = None;
        match self.state {
            ConnectionState::Connecting => {
                warn!("connection attempt timed out");
                let abandoned = self.transport.disconnect().await;
                self.fail_connect(ErrorKind::Timeout);
                match abandoned {
                    Ok(()) => self.await_link_down(),
                    Err(err) => debug!("abandoning connection attempt refused: {}", err),
                }
            }
            ConnectionState::Discovering => {
                warn!("service discovery timed out");
                self.fail_discovery(ErrorKind::Timeout).await;
            }
            ConnectionState::Disconnecting => {
                warn!("disconnect not confirmed in time; closing anyway");
                self.finish_teardown().await;
            }
            ConnectionState::Disconnected if self.awaiting_link_down => {
                debug!("previous link never reported closed; moving on");
                self.link_down_confirmed().await;
            }
            _ => {}
        }
    }

    /// Starts queued operations until one is accepted by the transport.
    async fn dispatch(&mut self) {
        while self.state == ConnectionState::Ready {
            let Some(entry) = self.queue.start_next(Instant::now()) else {
                return;
            };
            let (id, operation) = (entry.id, entry.operation.clone());
            debug!("dispatching {} ({})", id, operation);
            let Err(err) = self.issue(&operation).await else {
                return;
            };
            warn!("{} refused by transport: {}", id, err);
            if let Some(entry) = self.queue.complete() {
                self.finish(entry, Err(err));
            }
        }
    }

    async fn issue(&self, operation: &PendingOperation) -> Result<()> {
        match operation {
            PendingOperation::Read { characteristic } => self.transport.read_characteristic(*characteristic).await,
            PendingOperation::Write {
                characteristic,
                payload,
                ack_required,
            } => {
                let write_type = self.properties(*characteristic).write_type(*ack_required);
                self.transport
                    .write_characteristic(*characteristic, payload, write_type)
                    .await
            }
            PendingOperation::SetNotification { characteristic, enable } => {
                let value = self.properties(*characteristic).cccd_value(*enable);
                self.transport
                    .set_characteristic_notification(*characteristic, *enable)
                    .await?;
                self.transport
                    .write_descriptor(
                        *characteristic,
                        descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
                        &value,
                    )
                    .await
            }
        }
    }

    fn properties(&self, characteristic: Uuid) -> CharacteristicProperties {
        self.services
            .as_deref()
            .and_then(|services| find_characteristic(services, characteristic))
            .map(|c| c.properties)
            .unwrap_or_default()
    }

    /// Publishes the terminal event of an operation and resolves its handle.
    fn finish(&self, entry: QueuedOperation<Responder>, outcome: Result<OperationOutput>) {
        let QueuedOperation {
            id,
            operation,
            responder,
        } = entry;
        let uuid = operation.characteristic();
        let event = match &outcome {
            Ok(OperationOutput::Read(value)) => SessionEvent::CharacteristicRead {
                id,
                uuid,
                value: value.clone(),
            },
            Ok(OperationOutput::Written) => SessionEvent::CharacteristicWritten { id, uuid },
            Ok(OperationOutput::NotificationsChanged(enabled)) => SessionEvent::NotificationStateChanged {
                id,
                uuid,
                enabled: *enabled,
            },
            Err(err) => {
                debug!("{} ({}) failed: {}", id, operation, err);
                SessionEvent::OperationFailed { id, reason: err.kind() }
            }
        };
        self.publish(event);
        // the caller may have dropped its handle
        let _ = responder.send(outcome);
    }

    fn cancel_queued(&mut self) {
        for entry in self.queue.drain() {
            self.finish(entry, Err(cancelled("session torn down")));
        }
    }

    fn set_state(&mut self, new: ConnectionState) {
        let old = std::mem::replace(&mut self.state, new);
        if old == new {
            return;
        }
        self.shared.snapshot().state = new;
        debug!("session state {} -> {}", old, new);
        self.publish(SessionEvent::StateChanged { old, new });
    }

    fn publish(&self, event: SessionEvent) {
        self.shared.events.publish(event);
    }

    fn remember(&self, characteristic: Uuid, value: &[u8]) {
        let updated_at = SystemTime::now();
        self.shared.snapshot().values.insert(
            characteristic,
            CharacteristicValue {
                uuid: characteristic,
                value: value.to_vec(),
                updated_at,
            },
        );
        self.record(characteristic, value, updated_at);
    }

    fn record(&self, characteristic: Uuid, value: &[u8], timestamp: SystemTime) {
        if !self.shared.config.history_records {
            return;
        }
        let address = self.peripheral.as_ref().map(|p| p.address.clone()).unwrap_or_default();
        self.shared.records.publish(ValueRecord {
            address,
            uuid: characteristic,
            value: value.to_vec(),
            timestamp,
        });
    }

    async fn shutdown(mut self) {
        debug!("all session handles dropped; shutting down");
        self.reconnect = None;
        self.awaiting_link_down = false;
        if self.state != ConnectionState::Disconnected {
            if let Err(err) = self.transport.disconnect().await {
                debug!("disconnect on shutdown refused: {}", err);
            }
            self.finish_teardown().await;
        }
        self.shared.events.close();
        self.shared.records.close();
    }
}
