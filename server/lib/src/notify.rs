//! Change notifications. After a committed change to a resource's identities the store
//! publishes an [`IdentityEvent`] on the resource's identity topic. Publishing is fire and
//! forget: a failed or unheard notification never fails the change that caused it.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityEvent {
    pub rsc_id: ResourceId,
    pub idn_type: String,
}

impl IdentityEvent {
    pub fn new(rsc_id: ResourceId, idn_type: &str) -> Self {
        IdentityEvent {
            rsc_id,
            idn_type: idn_type.to_string(),
        }
    }

    /// `~site/rsc/<rsc_id>/identity`
    pub fn topic(&self) -> String {
        format!("~site/rsc/{}/identity", self.rsc_id)
    }
}

pub trait IdentityNotifier: Send + Sync {
    fn publish(&self, topic: &str, event: &IdentityEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl IdentityNotifier for NullNotifier {
    fn publish(&self, topic: &str, _event: &IdentityEvent) {
        trace!(%topic, "identity event dropped");
    }
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<(String, IdentityEvent)>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(NOTIFY_CHANNEL_CAPACITY)
    }
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        BroadcastNotifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, IdentityEvent)> {
        self.tx.subscribe()
    }
}

impl IdentityNotifier for BroadcastNotifier {
    fn publish(&self, topic: &str, event: &IdentityEvent) {
        match self.tx.send((topic.to_string(), event.clone())) {
            Ok(listeners) => trace!(%topic, %listeners, "identity event published"),
            // No subscribers is not an error.
            Err(_) => trace!(%topic, "identity event has no subscribers"),
        }
    }
}
