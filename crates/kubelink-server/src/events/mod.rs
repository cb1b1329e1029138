//! Fan-out of watch events streamed up by agents.

use tokio::sync::broadcast;
use tracing::trace;

use kubelink_proto::v1::WatchEvent;

/// Default capacity of the broadcast ring; slow subscribers lag past it.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Sink for watch events received on tunnels.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, cluster_id: &str, resource: &str, event: WatchEvent);
}

/// A watch event tagged with the cluster it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub cluster_id: String,
    pub resource: String,
    pub event: WatchEvent,
}

/// [`EventPublisher`] backed by a `tokio::sync::broadcast` channel.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventPublisher for EventBroadcaster {
    fn publish(&self, cluster_id: &str, resource: &str, event: WatchEvent) {
        let event = ClusterEvent {
            cluster_id: cluster_id.to_string(),
            resource: resource.to_string(),
            event,
        };
        // Err only means nobody is subscribed.
        if self.tx.send(event).is_err() {
            trace!(cluster_id, resource, "Dropped watch event with no subscribers");
        }
    }
}
