//! Synchronous post-commit publication to subscribers.
//!
//! After an aggregate's batch has been fully accepted by the store, `save`
//! hands it to the [`SubscriberHub`]. Fan-out is synchronous and in
//! registration order; a subscriber error aborts the remainder and propagates
//! back to the `save` caller — the store commit stands, which is what gives
//! downstream consumers at-least-once semantics. Asynchronous fan-out is a
//! subscriber concern: decoupled consumers should use the broadcast mirror
//! via [`SubscriberHub::subscribe`] instead of registering.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::error::{Result, SourcingError};
use crate::event::DomainEvent;

/// Default buffer size for the live broadcast mirror.
const DEFAULT_BUFFER: usize = 1024;

//─────────────────────────────
//  Subscriber contract
//─────────────────────────────

/// Receives batches of newly persisted events.
pub trait Subscriber: Send + Sync {
    /// Handle one committed batch.
    ///
    /// Errors propagate to the `save` caller after the commit; they cannot
    /// undo it. Subscribers that must not fail a save should swallow their
    /// own errors.
    fn on_events(&self, events: &[DomainEvent]) -> anyhow::Result<()>;
}

//─────────────────────────────
//  Subscriber hub
//─────────────────────────────

/// In-process fan-out hub for committed event batches.
pub struct SubscriberHub {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    broadcast_tx: broadcast::Sender<DomainEvent>,
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberHub {
    /// A hub with the default broadcast buffer.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// A hub with a custom broadcast buffer size.
    ///
    /// The buffer only affects the broadcast mirror; registered subscribers
    /// are called synchronously and never miss a batch.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer_size);
        Self {
            subscribers: RwLock::new(Vec::new()),
            broadcast_tx,
        }
    }

    /// Register a subscriber. Publication order follows registration order.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(subscriber);
        }
    }

    /// Number of registered (synchronous) subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Subscribe to the live broadcast mirror.
    ///
    /// Receivers get copies of every published event but may miss some if
    /// they fall behind the buffer; they do not participate in error
    /// propagation.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Publish a committed batch.
    ///
    /// The broadcast mirror is fed first (send errors are ignored — they
    /// only mean nobody is listening), then registered subscribers run in
    /// order. The first subscriber error aborts the remainder and is
    /// returned as [`SourcingError::Publish`].
    pub fn publish(&self, events: &[DomainEvent]) -> Result<()> {
        for event in events {
            let _ = self.broadcast_tx.send(event.clone());
        }

        let subscribers = self
            .subscribers
            .read()
            .map_err(|_| SourcingError::Publish(anyhow::anyhow!("subscriber lock poisoned")))?;
        for subscriber in subscribers.iter() {
            subscriber
                .on_events(events)
                .map_err(SourcingError::Publish)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
