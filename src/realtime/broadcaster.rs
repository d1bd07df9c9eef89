//! Fan-out of server messages to connected observers.
//!
//! Each observer owns a bounded queue. A broadcast serializes the message
//! once and offers it to every queue without waiting: a full queue drops
//! the message for that observer only, and a closed queue unregisters the
//! observer. No observer can stall delivery to the others.

use crate::realtime::messages::ServerMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Receiving end of one observer registration.
pub struct Observer {
    id: Uuid,
    rx: mpsc::Receiver<Arc<str>>,
}

impl Observer {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next serialized message, or `None` once the observer is unregistered.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving; later broadcasts will unregister this observer.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Observers whose queue was full
    pub dropped: usize,
    /// Observers found closed and unregistered
    pub removed: usize,
}

/// Registry of connected observers.
pub struct EventBroadcaster {
    queue_size: usize,
    observers: Mutex<HashMap<Uuid, mpsc::Sender<Arc<str>>>>,
}

impl EventBroadcaster {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size: queue_size.max(1),
            observers: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self) -> Observer {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = Uuid::new_v4();
        self.observers.lock().insert(id, tx);
        tracing::debug!(observer = %id, "Observer registered");
        Observer { id, rx }
    }

    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.observers.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(observer = %id, "Observer unregistered");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Unregister everyone. Pending `recv` calls resolve to `None`.
    pub fn close_all(&self) {
        let count = {
            let mut observers = self.observers.lock();
            let count = observers.len();
            observers.clear();
            count
        };
        if count > 0 {
            tracing::info!(count, "Closed all observers");
        }
    }

    pub fn broadcast(&self, message: &ServerMessage) -> DeliveryReport {
        match message.to_json() {
            Ok(json) => self.broadcast_raw(Arc::from(json)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                DeliveryReport::default()
            }
        }
    }

    /// Offer an already serialized payload to every observer.
    pub fn broadcast_raw(&self, payload: Arc<str>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut observers = self.observers.lock();

        observers.retain(|id, tx| match tx.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.dropped += 1;
                tracing::warn!(observer = %id, "Observer queue full, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.removed += 1;
                false
            }
        });

        if report.removed > 0 {
            tracing::debug!(removed = report.removed, "Removed closed observers");
        }
        report
    }
}
