//! The relay queue: unbounded, ordered, single-consumer.
//!
//! Producers (the inbound handler) never block; the single [`RelayReceiver`]
//! is owned by the relay worker.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::base::types::ChatRequest;

/// A request in transit, tagged with its position in the queue.
#[derive(Debug, Clone)]
pub struct RelayQueueEntry {
    pub sequence: u64,
    pub request: ChatRequest,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("intake is closed")]
    IntakeClosed,
}

struct RelayQueueInner {
    sender: mpsc::UnboundedSender<RelayQueueEntry>,
    closed: AtomicBool,
    next_sequence: Mutex<u64>,
}

/// Producer handle of the relay queue.
///
/// It is designed to be trivially cloneable; every clone feeds the same consumer.
#[derive(Clone)]
pub struct RelayQueue {
    inner: Arc<RelayQueueInner>,
}

impl RelayQueue {
    /// Create a queue and its only receiver.
    pub fn new() -> (Self, RelayReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();

        let queue = Self {
            inner: Arc::new(RelayQueueInner {
                sender,
                closed: AtomicBool::new(false),
                next_sequence: Mutex::new(0),
            }),
        };

        (queue, RelayReceiver { receiver })
    }

    /// Add a request to the back of the queue. Never blocks.
    ///
    /// Returns the request's sequence number, or `IntakeClosed` once shutdown has begun.
    pub fn enqueue(&self, request: ChatRequest) -> Result<u64, EnqueueError> {
        // Sequence assignment and send happen under one lock so sequence order is queue order.
        let mut next = self.inner.next_sequence.lock().unwrap_or_else(PoisonError::into_inner);

        if self.is_closed() {
            return Err(EnqueueError::IntakeClosed);
        }

        let sequence = *next;
        self.inner.sender.send(RelayQueueEntry { sequence, request }).map_err(|_| EnqueueError::IntakeClosed)?;
        *next += 1;

        debug!("Enqueued request #{sequence}.");

        Ok(sequence)
    }

    /// Stop accepting new requests. Already queued requests stay queued.
    pub fn close(&self) {
        let _guard = self.inner.next_sequence.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            info!("Relay intake closed.");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Consumer half of the relay queue.
pub struct RelayReceiver {
    receiver: mpsc::UnboundedReceiver<RelayQueueEntry>,
}

impl RelayReceiver {
    /// Wait for the next entry.
    ///
    /// Returns `None` only after `close` has been called and every queued entry was taken,
    /// or once all producers are gone.
    pub async fn recv(&mut self) -> Option<RelayQueueEntry> {
        self.receiver.recv().await
    }

    /// Refuse further sends at the channel level while keeping queued entries receivable.
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Number of entries waiting.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

// Tests.
