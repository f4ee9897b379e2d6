//! Delivery gateway abstraction.
//!
//! The dispatcher publishes outcomes through a [`DeliveryGateway`] rather
//! than talking to connections directly, keeping the relay transport-
//! agnostic. [`BroadcastGateway`] is the in-process implementation backed
//! by tokio broadcast channels and per-user queues.

use crate::event::ChatEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

/// Default capacity for the public and presence broadcast channels.
const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Gateway errors.
///
/// Delivery is best-effort throughout; these are diagnostics for the
/// dispatcher's logs, never propagated to senders.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The underlying delivery channel is gone.
    #[error("Delivery channel closed")]
    Closed,
}

/// Abstract publish capability used by the dispatcher for fan-out.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Publish an event to every subscriber of the public topic.
    ///
    /// Returns the number of subscribers that received the event.
    async fn publish_public(&self, event: &ChatEvent) -> Result<usize, GatewayError>;

    /// Deliver an event to exactly one recipient's private queue.
    ///
    /// Returns `false` if the recipient has no registered queue; the
    /// event is discarded in that case (no dead-letter, no retry).
    async fn publish_private(&self, recipient: &str, event: &ChatEvent)
        -> Result<bool, GatewayError>;

    /// Publish the full active-user set to the presence topic.
    ///
    /// Returns the number of subscribers that received the update.
    async fn publish_presence(&self, users: &[String]) -> Result<usize, GatewayError>;
}

/// In-process gateway backed by tokio channels.
///
/// The public and presence topics are broadcast channels; each connected
/// user registers an unbounded mpsc queue for private deliveries.
/// Payloads are shared via `Arc` so fan-out never copies the event.
#[derive(Debug)]
pub struct BroadcastGateway {
    public: broadcast::Sender<Arc<ChatEvent>>,
    presence: broadcast::Sender<Arc<Vec<String>>>,
    private_queues: DashMap<String, mpsc::UnboundedSender<Arc<ChatEvent>>>,
}

impl BroadcastGateway {
    /// Create a gateway with default topic capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Create a gateway with a specific topic capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (public, _) = broadcast::channel(capacity);
        let (presence, _) = broadcast::channel(capacity);
        Self {
            public,
            presence,
            private_queues: DashMap::new(),
        }
    }

    /// Subscribe to the public topic.
    #[must_use]
    pub fn subscribe_public(&self) -> broadcast::Receiver<Arc<ChatEvent>> {
        self.public.subscribe()
    }

    /// Subscribe to the presence topic.
    #[must_use]
    pub fn subscribe_presence(&self) -> broadcast::Receiver<Arc<Vec<String>>> {
        self.presence.subscribe()
    }

    /// Register a private queue for a user, returning its receiving end.
    ///
    /// A second registration for the same user replaces the first; the
    /// old receiver stops getting deliveries.
    pub fn register_private_queue(&self, user: &str) -> mpsc::UnboundedReceiver<Arc<ChatEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.private_queues.insert(user.to_string(), tx);
        debug!(user = %user, "Registered private queue");
        rx
    }

    /// Drop a user's private queue. Subsequent private sends to the user
    /// are discarded.
    pub fn deregister_private_queue(&self, user: &str) {
        if self.private_queues.remove(user).is_some() {
            debug!(user = %user, "Deregistered private queue");
        }
    }

    /// Number of public-topic subscribers.
    #[must_use]
    pub fn public_subscriber_count(&self) -> usize {
        self.public.receiver_count()
    }
}

impl Default for BroadcastGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryGateway for BroadcastGateway {
    async fn publish_public(&self, event: &ChatEvent) -> Result<usize, GatewayError> {
        let count = self.public.send(Arc::new(event.clone())).unwrap_or_default();
        trace!(kind = %event.kind, recipients = count, "Published to public topic");
        Ok(count)
    }

    async fn publish_private(
        &self,
        recipient: &str,
        event: &ChatEvent,
    ) -> Result<bool, GatewayError> {
        let Some(queue) = self.private_queues.get(recipient) else {
            debug!(recipient = %recipient, "No private queue; discarding");
            return Ok(false);
        };

        if queue.send(Arc::new(event.clone())).is_err() {
            // Receiver dropped without deregistering; clean up the entry.
            drop(queue);
            self.private_queues.remove(recipient);
            debug!(recipient = %recipient, "Private queue closed; discarding");
            return Ok(false);
        }

        trace!(recipient = %recipient, "Delivered private event");
        Ok(true)
    }

    async fn publish_presence(&self, users: &[String]) -> Result<usize, GatewayError> {
        let count = self
            .presence
            .send(Arc::new(users.to_vec()))
            .unwrap_or_default();
        trace!(online = users.len(), recipients = count, "Published presence");
        Ok(count)
    }
}
