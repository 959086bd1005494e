//! FIFO serialization of characteristic operations.
//!
//! GATT allows a single outstanding request per link, so operations wait here until the link is free. The queue
//! itself is passive: the session decides when to start the next entry and reports completions back. At most one
//! entry is in flight at any time, and every entry leaves the queue exactly once, through [`OperationQueue::complete`],
//! [`OperationQueue::expire`] or [`OperationQueue::drain`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::gatt::{OperationId, PendingOperation};

/// An operation and whatever the owner needs to report its outcome.
#[derive(Debug)]
pub struct QueuedOperation<R> {
    #[allow(missing_docs)]
    pub id: OperationId,
    #[allow(missing_docs)]
    pub operation: PendingOperation,
    /// Owner data carried along with the operation
    pub responder: R,
}

#[derive(Debug)]
struct InFlight<R> {
    entry: QueuedOperation<R>,
    deadline: Instant,
}

/// The per-session operation queue.
#[derive(Debug)]
pub struct OperationQueue<R> {
    queued: VecDeque<QueuedOperation<R>>,
    in_flight: Option<InFlight<R>>,
    timeout: Duration,
}

impl<R> OperationQueue<R> {
    /// Creates an empty queue whose operations may hold the link for at most `timeout` each.
    pub fn new(timeout: Duration) -> Self {
        OperationQueue {
            queued: VecDeque::new(),
            in_flight: None,
            timeout,
        }
    }

    /// Appends an operation behind everything already queued.
    pub fn enqueue(&mut self, id: OperationId, operation: PendingOperation, responder: R) {
        self.queued.push_back(QueuedOperation {
            id,
            operation,
            responder,
        });
    }

    /// Number of operations waiting for the link, excluding the one in flight.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Is nothing queued or in flight?
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_none()
    }

    /// The operation currently holding the link.
    pub fn in_flight(&self) -> Option<&QueuedOperation<R>> {
        self.in_flight.as_ref().map(|f| &f.entry)
    }

    /// When the in-flight operation times out.
    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| f.deadline)
    }

    /// Moves the head of the queue in flight, if the link is free.
    ///
    /// Returns `None` when an operation is already in flight or nothing is queued.
    pub fn start_next(&mut self, now: Instant) -> Option<&QueuedOperation<R>> {
        if self.in_flight.is_some() {
            return None;
        }
        let entry = self.queued.pop_front()?;
        let in_flight = self.in_flight.insert(InFlight {
            entry,
            deadline: now + self.timeout,
        });
        Some(&in_flight.entry)
    }

    /// Takes the in-flight operation out for completion, freeing the link.
    pub fn complete(&mut self) -> Option<QueuedOperation<R>> {
        self.in_flight.take().map(|f| f.entry)
    }

    /// Takes the in-flight operation out if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<QueuedOperation<R>> {
        match &self.in_flight {
            Some(f) if f.deadline <= now => self.complete(),
            _ => None,
        }
    }

    /// Removes every operation that has not been started yet, oldest first. The in-flight one stays.
    pub fn drain(&mut self) -> Vec<QueuedOperation<R>> {
        self.queued.drain(..).collect()
    }
}
