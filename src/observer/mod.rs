// Subscriber registry and fan-out for one entity

mod channel;


pub use channel::QueueChannel;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one connected client endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    /// New time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An encoded message on its way to one or more clients.
///
/// The payload is shared, so fan-out to many subscribers does not copy it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Arc<[u8]>,
    pub reliable: bool,
}

impl OutboundMessage {
    pub fn new(payload: Vec<u8>, reliable: bool) -> Self {
        Self {
            payload: payload.into(),
            reliable,
        }
    }
}

/// The client's channel is gone or closed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("client channel closed")]
pub struct ChannelClosed;

/// Per-client ordered byte channel provided by the transport.
///
/// Entities call into a channel while holding their delivery lock, so an
/// implementation must not call back into the entity that is writing to it.
pub trait ClientChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a message without blocking.
    fn write(&self, message: OutboundMessage) -> Result<(), ChannelClosed>;
}

/// Outcome of handing a message to a single endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Endpoint is not (or no longer) subscribed
    NotSubscribed,
    /// The client side was dropped; the subscription was pruned
    Gone,
    /// The channel exists but refused the write
    Closed,
}

/// Summary of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// Subscriber set of one entity.
///
/// Channels are held weakly: a disconnected client is not kept alive by the
/// entities it observed, and a destroyed entity never touches a client that
/// is already gone.
pub struct ObserverBroadcaster {
    subscribers: DashMap<EndpointId, Weak<dyn ClientChannel>>,
}

impl ObserverBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Add an endpoint. Returns false if it was already subscribed, in which
    /// case its channel is replaced.
    pub fn subscribe(&self, endpoint: EndpointId, channel: &Arc<dyn ClientChannel>) -> bool {
        let previous = self.subscribers.insert(endpoint, Arc::downgrade(channel));
        previous.is_none()
    }

    /// Remove an endpoint. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, endpoint: &EndpointId) -> bool {
        self.subscribers.remove(endpoint).is_some()
    }

    pub fn is_subscribed(&self, endpoint: &EndpointId) -> bool {
        self.subscribers.contains_key(endpoint)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Snapshot of current subscriber ids
    pub fn subscribers(&self) -> Vec<EndpointId> {
        self.subscribers.iter().map(|entry| *entry.key()).collect()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.clear();
    }

    /// Send a message to one subscribed endpoint.
    pub fn send_to(&self, endpoint: &EndpointId, message: OutboundMessage) -> Delivery {
        let weak = match self.subscribers.get(endpoint) {
            Some(entry) => entry.value().clone(),
            None => return Delivery::NotSubscribed,
        };
        self.dispatch(endpoint, &weak, message)
    }

    /// Send a message to every current subscriber.
    ///
    /// Works on a copy of the subscriber set so concurrent subscribe and
    /// unsubscribe calls never block on or disturb an in-flight broadcast.
    /// A dead endpoint is skipped; the rest still receive the message.
    pub fn broadcast(&self, message: OutboundMessage) -> BroadcastReport {
        let snapshot: Vec<(EndpointId, Weak<dyn ClientChannel>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (endpoint, weak) in snapshot {
            // Removed after the snapshot was taken
            if !self.subscribers.contains_key(&endpoint) {
                report.skipped += 1;
                continue;
            }

            match self.dispatch(&endpoint, &weak, message.clone()) {
                Delivery::Delivered => report.delivered += 1,
                _ => report.skipped += 1,
            }
        }

        debug!(
            delivered = report.delivered,
            skipped = report.skipped,
            bytes = message.payload.len(),
            "Broadcast complete"
        );

        report
    }

    fn dispatch(
        &self,
        endpoint: &EndpointId,
        weak: &Weak<dyn ClientChannel>,
        message: OutboundMessage,
    ) -> Delivery {
        let Some(channel) = weak.upgrade() else {
            warn!(endpoint = %endpoint, "Client channel dropped, pruning subscription");
            // Only prune if the endpoint has not re-subscribed with a live channel
            self.subscribers
                .remove_if(endpoint, |_, current| current.strong_count() == 0);
            return Delivery::Gone;
        };

        if !channel.is_open() {
            warn!(endpoint = %endpoint, "Client channel closed, skipping");
            return Delivery::Closed;
        }

        match channel.write(message) {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Failed to write to client channel");
                Delivery::Closed
            }
        }
    }
}

impl Default for ObserverBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
