//! Best-effort fan-out of events to any number of subscribers.
//!
//! Publication never waits for subscribers. Each subscriber has its own buffer of `capacity` events; one that falls
//! further behind loses the oldest events it has not seen yet. Subscribers only see events published after they
//! subscribed.

use std::pin::Pin;
use std::task;

use async_broadcast::{InactiveReceiver, Receiver, RecvError, Sender, TryRecvError, TrySendError};
use futures_core::Stream;
use tracing::{trace, warn};

/// The publishing side of a bus.
#[derive(Clone)]
pub struct EventBus<T: Clone> {
    sender: Sender<T>,
    // keeps the channel open while nobody is subscribed
    _inactive: InactiveReceiver<T>,
}

impl<T: Clone> EventBus<T> {
    /// Creates a bus buffering at most `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        sender.set_await_active(false);
        EventBus {
            sender,
            _inactive: receiver.deactivate(),
        }
    }

    /// Delivers `event` to every current subscriber.
    pub fn publish(&self, event: T) {
        match self.sender.try_broadcast(event) {
            Ok(None) => {}
            Ok(Some(_)) => trace!("a lagging subscriber lost its oldest event"),
            Err(TrySendError::Inactive(_)) => trace!("event published with no subscribers"),
            Err(TrySendError::Closed(_)) => trace!("event published on a closed bus"),
            Err(TrySendError::Full(_)) => warn!("event bus full"),
        }
    }

    /// Registers a new subscriber. It sees every event published from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.sender.new_receiver(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Closes the bus. Subscribers drain what is buffered and then see the end of the stream.
    pub fn close(&self) {
        self.sender.close();
    }
}

/// A subscription to an [`EventBus`]. Dropping it unsubscribes.
pub struct Subscription<T: Clone> {
    receiver: Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    /// Waits for the next event. Returns `None` once the bus is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Overflowed(missed)) => warn!("subscriber fell behind and missed {} events", missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Takes the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Overflowed(missed)) => warn!("subscriber fell behind and missed {} events", missed),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Stops receiving. Events already buffered for this subscriber are discarded.
    pub fn unsubscribe(self) {}
}

impl<T: Clone> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Option<T>> {
        std::pin::pin!(&mut self.receiver).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}
