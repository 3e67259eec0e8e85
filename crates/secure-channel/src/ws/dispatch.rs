//! Subscriber dispatch for decoded inbound envelopes.
//!
//! Subscribers are registered explicitly and called synchronously, in
//! registration order, once per decoded envelope. The subscriber map is
//! copied before calling out so a subscriber may (un)subscribe from inside
//! its own callback.

use crate::domain::{ConnectionId, Envelope};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Where an inbound envelope came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Sending connection
    pub connection_id: ConnectionId,
    /// Principal the connection authenticated as
    pub principal: String,
}

/// Receives every decoded inbound envelope.
///
/// Runs on the connection's read loop: a slow subscriber delays that
/// connection's next frame, so hand heavy work off to another task.
pub trait EnvelopeSubscriber: Send + Sync + 'static {
    fn on_envelope(&self, envelope: &Envelope, origin: &Origin);
}

impl<F> EnvelopeSubscriber for F
where
    F: Fn(&Envelope, &Origin) + Send + Sync + 'static,
{
    fn on_envelope(&self, envelope: &Envelope, origin: &Origin) {
        self(envelope, origin)
    }
}

/// Envelope paired with its origin, as delivered by [`ChannelSubscriber`]
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub envelope: Envelope,
    pub origin: Origin,
}

/// Subscriber that forwards into an unbounded mpsc channel
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<InboundEnvelope>,
}

impl ChannelSubscriber {
    /// Subscriber plus the receiving end
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InboundEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EnvelopeSubscriber for ChannelSubscriber {
    fn on_envelope(&self, envelope: &Envelope, origin: &Origin) {
        if self
            .tx
            .send(InboundEnvelope {
                envelope: envelope.clone(),
                origin: origin.clone(),
            })
            .is_err()
        {
            debug!(envelope_id = envelope.id(), "Channel subscriber receiver dropped");
        }
    }
}

/// Handle returned by [`SubscriberRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// Explicit subscriber registry
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriptionId, Arc<dyn EnvelopeSubscriber>>,
    id_counter: AtomicU64,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    /// No subscribers
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            id_counter: AtomicU64::new(1),
        }
    }

    /// Register a subscriber
    pub fn subscribe(&self, subscriber: Arc<dyn EnvelopeSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.id_counter.fetch_add(1, Ordering::SeqCst));
        self.subscribers.insert(id, subscriber);
        debug!(subscription_id = id.0, "Subscriber registered");
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription_id = id.0, "Subscriber removed");
        }
        removed
    }

    /// Number of subscribers
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `envelope` to every subscriber. Returns how many were called.
    pub fn dispatch(&self, envelope: &Envelope, origin: &Origin) -> usize {
        let mut targets: Vec<(SubscriptionId, Arc<dyn EnvelopeSubscriber>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        for (_, subscriber) in &targets {
            subscriber.on_envelope(envelope, origin);
        }
        targets.len()
    }
}
