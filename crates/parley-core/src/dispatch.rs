//! The relay dispatcher.
//!
//! The dispatcher accepts inbound chat events, classifies them, keeps the
//! presence registry consistent, persists accepted events, and fans them
//! out through the delivery gateway.
//!
//! Every operation returns an explicit result so callers and tests can
//! observe rejections; the relay itself never escalates. Persistence and
//! delivery failures are logged and the event still flows: storage
//! availability must not make chat traffic disappear.

use crate::event::ChatEvent;
use crate::gateway::DeliveryGateway;
use crate::presence::PresenceRegistry;
use crate::session::SessionTable;
use crate::store::{MessageStore, StoreError};
use crate::PersistedMessage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Dispatch rejections.
///
/// A rejected event is dropped before any persistence or delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The event carried no sender.
    #[error("Sender must not be empty")]
    EmptySender,

    /// A private event carried no recipient.
    #[error("Private message recipient must not be empty")]
    EmptyRecipient,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum records returned by a history query.
    pub history_limit: usize,
    /// Upper bound on a single store append before the event is
    /// delivered without a durable record.
    pub persist_timeout: Duration,
    /// Notice appended after the username in synthesized leave events.
    pub departure_notice: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            persist_timeout: Duration::from_secs(2),
            departure_notice: "has left the chat".to_string(),
        }
    }
}

/// Classifies inbound chat events and routes them to persistence and
/// delivery.
pub struct RelayDispatcher<S, G> {
    store: Arc<S>,
    gateway: Arc<G>,
    presence: PresenceRegistry,
    config: DispatcherConfig,
}

impl<S, G> RelayDispatcher<S, G>
where
    S: MessageStore,
    G: DeliveryGateway,
{
    /// Create a dispatcher with default configuration.
    #[must_use]
    pub fn new(store: Arc<S>, gateway: Arc<G>) -> Self {
        Self::with_config(store, gateway, DispatcherConfig::default())
    }

    /// Create a dispatcher with custom configuration.
    #[must_use]
    pub fn with_config(store: Arc<S>, gateway: Arc<G>, config: DispatcherConfig) -> Self {
        info!(
            history_limit = config.history_limit,
            persist_timeout_ms = config.persist_timeout.as_millis() as u64,
            "Creating relay dispatcher"
        );
        Self {
            store,
            gateway,
            presence: PresenceRegistry::new(),
            config,
        }
    }

    /// The presence registry (read access for the query surface).
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Current active users, as a consistent snapshot.
    #[must_use]
    pub fn active_users(&self) -> Vec<String> {
        self.presence.snapshot()
    }

    /// Recent history, bounded by the configured limit, ascending by
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn history(&self) -> Result<Vec<PersistedMessage>, StoreError> {
        self.store.recent(self.config.history_limit).await
    }

    /// Accept a public broadcast message.
    ///
    /// Stamps the server timestamp, persists, and publishes to the public
    /// topic. Returns the stamped event.
    ///
    /// # Errors
    ///
    /// Rejects events with an empty sender.
    pub async fn broadcast(
        &self,
        sender: &str,
        content: impl Into<String>,
    ) -> Result<ChatEvent, DispatchError> {
        if sender.is_empty() {
            return Err(DispatchError::EmptySender);
        }

        let event = ChatEvent::broadcast(sender, content);
        self.persist(&event).await;
        self.publish_public(&event).await;

        Ok(event)
    }

    /// Accept a private message addressed to a single recipient.
    ///
    /// Rejections happen before any persistence or gateway call. Accepted
    /// events are persisted and delivered only to the recipient's queue,
    /// never the public topic. A recipient with no registered queue is a
    /// silent drop inside the gateway.
    ///
    /// # Errors
    ///
    /// Rejects events with an empty sender or an empty recipient.
    pub async fn private(
        &self,
        sender: &str,
        recipient: &str,
        content: impl Into<String>,
    ) -> Result<ChatEvent, DispatchError> {
        if sender.is_empty() {
            return Err(DispatchError::EmptySender);
        }
        if recipient.is_empty() {
            return Err(DispatchError::EmptyRecipient);
        }

        let event = ChatEvent::private(sender, recipient, content);
        self.persist(&event).await;

        match self.gateway.publish_private(recipient, &event).await {
            Ok(true) => {}
            Ok(false) => debug!(recipient = %recipient, "Recipient offline; private event dropped"),
            Err(e) => warn!(recipient = %recipient, error = %e, "Private delivery failed"),
        }

        Ok(event)
    }

    /// Record a user joining: bind the session, update presence, publish
    /// the full set, and announce the arrival on the public topic.
    ///
    /// Returns the join event that was broadcast.
    ///
    /// # Errors
    ///
    /// Rejects events with an empty username.
    pub async fn join(
        &self,
        sessions: &SessionTable,
        connection_id: &str,
        username: &str,
    ) -> Result<ChatEvent, DispatchError> {
        if username.is_empty() {
            return Err(DispatchError::EmptySender);
        }

        sessions.bind(connection_id, username);
        let (_, users) = self.presence.join(username);
        self.publish_presence(&users).await;

        let event = ChatEvent::join(username);
        self.persist(&event).await;
        self.publish_public(&event).await;

        Ok(event)
    }

    /// Record a user leaving: unbind the session, update presence,
    /// publish the full set, and announce the departure.
    ///
    /// The returned event is synthesized by the server with a readable
    /// departure notice; it is not an echo of any inbound payload.
    ///
    /// # Errors
    ///
    /// Rejects events with an empty username.
    pub async fn leave(
        &self,
        sessions: &SessionTable,
        connection_id: &str,
        username: &str,
    ) -> Result<ChatEvent, DispatchError> {
        if username.is_empty() {
            return Err(DispatchError::EmptySender);
        }

        sessions.unbind(connection_id);
        let (_, users) = self.presence.leave(username);
        self.publish_presence(&users).await;

        let notice = format!("{} {}", username, self.config.departure_notice);
        let event = ChatEvent::leave(username, notice);
        self.persist(&event).await;
        self.publish_public(&event).await;

        Ok(event)
    }

    /// Best-effort append. Failures and timeouts are logged and the event
    /// still gets delivered.
    async fn persist(&self, event: &ChatEvent) {
        match tokio::time::timeout(self.config.persist_timeout, self.store.append(event)).await {
            Ok(Ok(record)) => {
                debug!(id = record.id, kind = %event.kind, "Persisted event");
            }
            Ok(Err(e)) => {
                warn!(kind = %event.kind, error = %e, "Store append failed; delivering anyway");
            }
            Err(_) => {
                warn!(kind = %event.kind, "Store append timed out; delivering anyway");
            }
        }
    }

    async fn publish_public(&self, event: &ChatEvent) {
        if let Err(e) = self.gateway.publish_public(event).await {
            warn!(kind = %event.kind, error = %e, "Public publish failed");
        }
    }

    async fn publish_presence(&self, users: &[String]) {
        if let Err(e) = self.gateway.publish_presence(users).await {
            warn!(online = users.len(), error = %e, "Presence publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::now_millis;
    use crate::gateway::GatewayError;
    use crate::EventKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// Store double that records every appended event.
    #[derive(Default)]
    struct RecordingStore {
        appended: Mutex<Vec<ChatEvent>>,
        next_id: AtomicI64,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn appended(&self) -> Vec<ChatEvent> {
            self.appended.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn append(&self, event: &ChatEvent) -> Result<PersistedMessage, StoreError> {
            if self.fail {
                return Err(StoreError::Storage("disk on fire".into()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.appended.lock().unwrap().push(event.clone());
            Ok(PersistedMessage::from_event(id, event))
        }

        async fn recent(&self, limit: usize) -> Result<Vec<PersistedMessage>, StoreError> {
            let appended = self.appended.lock().unwrap();
            let skip = appended.len().saturating_sub(limit);
            Ok(appended
                .iter()
                .enumerate()
                .skip(skip)
                .map(|(i, e)| PersistedMessage::from_event(i as i64 + 1, e))
                .collect())
        }
    }

    /// What the gateway was asked to deliver.
    #[derive(Debug, Clone, PartialEq)]
    enum Delivery {
        Public(ChatEvent),
        Private(String, ChatEvent),
        Presence(Vec<String>),
    }

    #[derive(Default)]
    struct RecordingGateway {
        deliveries: Mutex<Vec<Delivery>>,
    }

    impl RecordingGateway {
        fn deliveries(&self) -> Vec<Delivery> {
            self.deliveries.lock().unwrap().clone()
        }

        fn public_count(&self) -> usize {
            self.deliveries()
                .iter()
                .filter(|d| matches!(d, Delivery::Public(_)))
                .count()
        }

        fn presence_count(&self) -> usize {
            self.deliveries()
                .iter()
                .filter(|d| matches!(d, Delivery::Presence(_)))
                .count()
        }
    }

    #[async_trait]
    impl DeliveryGateway for RecordingGateway {
        async fn publish_public(&self, event: &ChatEvent) -> Result<usize, GatewayError> {
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Public(event.clone()));
            Ok(1)
        }

        async fn publish_private(
            &self,
            recipient: &str,
            event: &ChatEvent,
        ) -> Result<bool, GatewayError> {
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Private(recipient.to_string(), event.clone()));
            Ok(true)
        }

        async fn publish_presence(&self, users: &[String]) -> Result<usize, GatewayError> {
            self.deliveries
                .lock()
                .unwrap()
                .push(Delivery::Presence(users.to_vec()));
            Ok(1)
        }
    }

    fn dispatcher() -> (
        Arc<RecordingStore>,
        Arc<RecordingGateway>,
        RelayDispatcher<RecordingStore, RecordingGateway>,
    ) {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = RelayDispatcher::new(Arc::clone(&store), Arc::clone(&gateway));
        (store, gateway, dispatcher)
    }

    #[tokio::test]
    async fn test_broadcast_persists_and_publishes() {
        let (store, gateway, dispatcher) = dispatcher();

        let submitted = now_millis();
        let event = dispatcher.broadcast("alice", "hello").await.unwrap();

        assert_eq!(event.kind, EventKind::Broadcast);
        assert!(event.timestamp >= submitted);
        assert_eq!(store.appended().len(), 1);
        assert_eq!(gateway.deliveries(), vec![Delivery::Public(event)]);
    }

    #[tokio::test]
    async fn test_broadcast_rejects_empty_sender() {
        let (store, gateway, dispatcher) = dispatcher();

        let result = dispatcher.broadcast("", "hello").await;
        assert_eq!(result, Err(DispatchError::EmptySender));
        assert!(store.appended().is_empty());
        assert!(gateway.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_private_targets_exactly_one_recipient() {
        let (store, gateway, dispatcher) = dispatcher();

        let event = dispatcher.private("alice", "bob", "psst").await.unwrap();

        assert_eq!(event.kind, EventKind::Private);
        assert_eq!(store.appended().len(), 1);
        assert_eq!(
            gateway.deliveries(),
            vec![Delivery::Private("bob".to_string(), event)]
        );
        assert_eq!(gateway.public_count(), 0);
    }

    #[tokio::test]
    async fn test_private_empty_recipient_is_rejected_without_side_effects() {
        let (store, gateway, dispatcher) = dispatcher();

        let result = dispatcher.private("alice", "", "psst").await;
        assert_eq!(result, Err(DispatchError::EmptyRecipient));
        assert!(store.appended().is_empty());
        assert!(gateway.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_join_announces_and_updates_presence() {
        let (_, gateway, dispatcher) = dispatcher();
        let sessions = SessionTable::new();

        let event = dispatcher.join(&sessions, "conn-1", "alice").await.unwrap();

        assert_eq!(event.kind, EventKind::Join);
        assert_eq!(dispatcher.active_users(), vec!["alice"]);
        assert_eq!(sessions.username_of("conn-1").as_deref(), Some("alice"));

        let deliveries = gateway.deliveries();
        assert_eq!(
            deliveries[0],
            Delivery::Presence(vec!["alice".to_string()])
        );
        assert!(matches!(deliveries[1], Delivery::Public(_)));
    }

    #[tokio::test]
    async fn test_double_join_is_idempotent_but_rebroadcasts_presence() {
        let (_, gateway, dispatcher) = dispatcher();
        let sessions = SessionTable::new();

        dispatcher.join(&sessions, "conn-1", "alice").await.unwrap();
        dispatcher.join(&sessions, "conn-1", "alice").await.unwrap();

        assert_eq!(dispatcher.active_users(), vec!["alice"]);
        assert_eq!(gateway.presence_count(), 2);
    }

    #[tokio::test]
    async fn test_leave_synthesizes_departure_event() {
        let (_, gateway, dispatcher) = dispatcher();
        let sessions = SessionTable::new();

        dispatcher.join(&sessions, "conn-1", "alice").await.unwrap();
        dispatcher.join(&sessions, "conn-2", "bob").await.unwrap();
        let event = dispatcher.leave(&sessions, "conn-1", "alice").await.unwrap();

        assert_eq!(event.kind, EventKind::Leave);
        assert!(event.content.as_deref().unwrap().contains("alice"));
        assert_eq!(dispatcher.active_users(), vec!["bob"]);
        assert!(sessions.username_of("conn-1").is_none());

        let last = gateway.deliveries().pop().unwrap();
        match last {
            Delivery::Public(e) => assert_eq!(e, event),
            other => panic!("expected public departure broadcast, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_of_unknown_user_is_noop_on_presence() {
        let (_, gateway, dispatcher) = dispatcher();
        let sessions = SessionTable::new();

        dispatcher.join(&sessions, "conn-1", "alice").await.unwrap();
        dispatcher.leave(&sessions, "conn-9", "ghost").await.unwrap();

        assert_eq!(dispatcher.active_users(), vec!["alice"]);
        // The full set is still re-published on the attempt.
        assert_eq!(gateway.presence_count(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_drop_delivery() {
        let store = Arc::new(RecordingStore::failing());
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = RelayDispatcher::new(store, Arc::clone(&gateway));

        let event = dispatcher.broadcast("alice", "hello").await.unwrap();
        assert_eq!(gateway.deliveries(), vec![Delivery::Public(event)]);
    }

    #[tokio::test]
    async fn test_history_respects_limit() {
        let store = Arc::new(RecordingStore::default());
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = RelayDispatcher::with_config(
            Arc::clone(&store),
            gateway,
            DispatcherConfig {
                history_limit: 2,
                ..DispatcherConfig::default()
            },
        );

        for i in 0..5 {
            dispatcher
                .broadcast("alice", format!("message {i}"))
                .await
                .unwrap();
        }

        let history = dispatcher.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].timestamp <= history[1].timestamp);
        assert_eq!(history[1].content.as_deref(), Some("message 4"));
    }
}
