//! The consumer service.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use brokerlink_types::ConsumedMessage;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result, TransportError};
use crate::events::{Connected, ErrorEvent, ErrorOrigin, ListenerRegistry, ListenerResult};
use crate::subscription::{ActiveSubscription, Handshake, RecordSink};
use crate::transport::{SubscriptionRequest, Transport};

const SERVICE: &str = "consumer";

/// Options for [`ConsumerService::subscribe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    group_id: Option<String>,
    from_beginning: bool,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumer group to join. Defaults to `<client_id>-consumer`.
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Start from the earliest retained record instead of only new ones.
    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }
}

#[derive(Debug, Default)]
struct ConsumerListeners {
    message: ListenerRegistry<ConsumedMessage>,
    connected: ListenerRegistry<Connected>,
    error: ListenerRegistry<ErrorEvent>,
}

#[async_trait]
impl RecordSink for ConsumerListeners {
    async fn on_connected(&self, connected: Connected) {
        let failures = self.connected.dispatch(connected).await;
        self.error.report(SERVICE, None, failures).await;
    }

    async fn on_record(&self, message: ConsumedMessage) {
        let id = message.id();
        let failures = self.message.dispatch(message).await;
        self.error.report(SERVICE, Some(id), failures).await;
    }

    async fn on_transport_error(&self, error: TransportError) {
        let event = ErrorEvent::new(ErrorOrigin::Transport, None, Arc::new(error));
        self.error.emit(SERVICE, event).await;
    }
}

/// Subscribes to topics and delivers records to listeners.
///
/// At most one subscription is active at a time. Records are delivered one
/// at a time: every `message` listener finishes with a record before the
/// next record is received.
///
/// # Example
///
/// ```rust,no_run
/// use brokerlink_sdk::{BrokerClient, ConnectionConfig, MemoryBroker, SubscribeOptions};
///
/// # async fn run() -> brokerlink_sdk::Result<()> {
/// let client = BrokerClient::new(ConnectionConfig::default(), MemoryBroker::new());
///
/// client.consumer().on_message(|message| async move {
///     println!("{}: {:?}", message.topic, message.value_str());
///     Ok(())
/// });
/// client
///     .consumer()
///     .subscribe(["orders"], SubscribeOptions::new().from_beginning(true))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsumerService {
    config: Arc<ConnectionConfig>,
    transport: Arc<dyn Transport>,
    listeners: Arc<ConsumerListeners>,
    active: tokio::sync::Mutex<Option<ActiveSubscription>>,
}

impl ConsumerService {
    pub fn new(config: Arc<ConnectionConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            listeners: Arc::new(ConsumerListeners::default()),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Connect, join the consumer group and start delivering records.
    ///
    /// Returns once the subscription is established. Fails with
    /// [`Error::Connection`] if the broker cannot be reached within the
    /// connect timeout, [`Error::AlreadySubscribed`] if a subscription is
    /// active and [`Error::NoTopics`] if `topics` is empty.
    pub async fn subscribe<I, S>(&self, topics: I, options: SubscribeOptions) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: Vec<String> = topics.into_iter().map(Into::into).collect();

        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(Error::AlreadySubscribed { service: SERVICE });
        }

        let request = SubscriptionRequest {
            topics,
            group_id: options
                .group_id
                .unwrap_or_else(|| self.config.group_for(SERVICE)),
            from_beginning: options.from_beginning,
        };
        let handshake = Handshake::perform(self.transport.as_ref(), &self.config, request).await?;

        let subscription = handshake.start(self.listeners.clone(), SERVICE);
        info!(
            service = SERVICE,
            topics = ?subscription.topics(),
            group_id = subscription.group_id(),
            "Subscribed"
        );
        *active = Some(subscription);
        Ok(())
    }

    /// Register a listener for every received record.
    pub fn on_message<F, Fut>(&self, listener: F)
    where
        F: Fn(ConsumedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.listeners.message.register(listener);
    }

    /// Register a listener for subscription start.
    pub fn on_connected<F, Fut>(&self, listener: F)
    where
        F: Fn(Connected) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.listeners.connected.register(listener);
    }

    /// Register a listener for listener and transport failures.
    pub fn on_error<F, Fut>(&self, listener: F)
    where
        F: Fn(ErrorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.listeners.error.register(listener);
    }

    /// Whether a subscription is active.
    ///
    /// Stays `true` after the connection is lost until `disconnect` is called.
    pub async fn is_subscribed(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Topics of the active subscription.
    pub async fn topics(&self) -> Option<Vec<String>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|subscription| subscription.topics().to_vec())
    }

    /// Stop delivering records and release the subscription.
    ///
    /// Waits for the record being dispatched, up to the configured drain
    /// timeout. The service is unsubscribed afterwards even if releasing the
    /// subscription fails. Calling this while not subscribed does nothing.
    /// A `subscribe` issued meanwhile waits until the old loop has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        // Held until the old loop is gone so a new subscription cannot
        // dispatch alongside it.
        let mut active = self.active.lock().await;
        let Some(subscription) = active.take() else {
            debug!(service = SERVICE, "Disconnect requested while not subscribed");
            return Ok(());
        };

        let result = subscription.shutdown(self.config.drain_timeout()).await;
        match &result {
            Ok(()) => info!(service = SERVICE, "Disconnected"),
            Err(err) => warn!(service = SERVICE, error = %err, "Disconnect failed"),
        }
        result.map_err(Error::from)
    }
}

impl std::fmt::Debug for ConsumerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerService")
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ListenerError;
    use crate::memory::MemoryBroker;
    use crate::transport::OutgoingRecord;
    use brokerlink_types::MessageId;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn service(broker: &MemoryBroker) -> ConsumerService {
        ConsumerService::new(
            Arc::new(ConnectionConfig::default()),
            Arc::new(broker.clone()),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn subscribe_twice_is_rejected() {
        let broker = MemoryBroker::new();
        let consumer = service(&broker);

        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        let second = consumer.subscribe(["b"], SubscribeOptions::new()).await;

        assert!(matches!(second, Err(Error::AlreadySubscribed { service: "consumer" })));
        assert_eq!(consumer.topics().await, Some(vec!["a".to_string()]));
        consumer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_broker_fails_with_connection_error() {
        let broker = MemoryBroker::new();
        broker.set_unreachable(true);
        let consumer = service(&broker);

        let result = consumer.subscribe(["a"], SubscribeOptions::new()).await;

        assert!(result.unwrap_err().is_connection());
        assert!(!consumer.is_subscribed().await);
    }

    #[tokio::test]
    async fn default_group_is_derived_from_client_id() {
        let broker = MemoryBroker::new();
        let consumer = service(&broker);

        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        assert_eq!(broker.active_groups(), vec!["brokerlink-consumer".to_string()]);
        consumer.disconnect().await.unwrap();

        consumer
            .subscribe(["a"], SubscribeOptions::new().group_id("billing"))
            .await
            .unwrap();
        assert_eq!(broker.active_groups(), vec!["billing".to_string()]);
        consumer.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn connected_precedes_messages() {
        let broker = MemoryBroker::new();
        broker.publish("a", OutgoingRecord::new("backlog"));
        let consumer = service(&broker);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        consumer.on_connected(move |connected| {
            let log = log_clone.clone();
            async move {
                log.lock().push(format!("connected {}", connected.group_id));
                Ok(())
            }
        });
        let log_clone = log.clone();
        consumer.on_message(move |message| {
            let log = log_clone.clone();
            async move {
                log.lock().push(message.value_str().unwrap_or_default().to_string());
                Ok(())
            }
        });

        consumer
            .subscribe(["a"], SubscribeOptions::new().from_beginning(true))
            .await
            .unwrap();
        settle().await;
        consumer.disconnect().await.unwrap();

        assert_eq!(*log.lock(), vec!["connected brokerlink-consumer", "backlog"]);
    }

    #[tokio::test]
    async fn failing_listener_yields_error_event_with_message_id() {
        let broker = MemoryBroker::new();
        let consumer = service(&broker);
        let errors = Arc::new(Mutex::new(Vec::new()));

        consumer.on_message(|message| async move {
            if message.value_str() == Some("bad") {
                return Err::<(), ListenerError>("rejected".into());
            }
            Ok(())
        });
        let errors_clone = errors.clone();
        consumer.on_error(move |event| {
            let errors = errors_clone.clone();
            async move {
                errors.lock().push((event.origin, event.message, event.cause.to_string()));
                Ok(())
            }
        });

        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        broker.publish("a", OutgoingRecord::new("good"));
        broker.publish("a", OutgoingRecord::new("bad"));
        settle().await;
        consumer.disconnect().await.unwrap();

        assert_eq!(
            *errors.lock(),
            vec![(
                ErrorOrigin::Listener,
                Some(MessageId::new("a", 0, 1)),
                "rejected".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let broker = MemoryBroker::new();
        let consumer = service(&broker);

        consumer.disconnect().await.unwrap();
        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        consumer.disconnect().await.unwrap();
        consumer.disconnect().await.unwrap();

        assert!(!consumer.is_subscribed().await);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn failed_unsubscribe_is_reported_and_state_is_cleared() {
        let broker = MemoryBroker::new();
        let consumer = service(&broker);
        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();

        broker.fail_next_unsubscribe(TransportError::Connection("reset".into()));
        let result = consumer.disconnect().await;

        assert!(matches!(result, Err(Error::Transport(TransportError::Connection(_)))));
        assert!(!consumer.is_subscribed().await);
        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        consumer.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_listener_is_aborted_after_drain_timeout() {
        let broker = MemoryBroker::new();
        let config = ConnectionConfig::builder()
            .drain_timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let consumer = ConsumerService::new(Arc::new(config), Arc::new(broker.clone()));
        let finished = Arc::new(Mutex::new(false));

        let finished_clone = finished.clone();
        consumer.on_message(move |_| {
            let finished = finished_clone.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                *finished.lock() = true;
                Ok(())
            }
        });

        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        broker.publish("a", OutgoingRecord::new("slow"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        consumer.disconnect().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!*finished.lock());
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_waits_for_draining_disconnect() {
        let broker = MemoryBroker::new();
        let config = ConnectionConfig::builder()
            .drain_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let consumer = Arc::new(ConsumerService::new(Arc::new(config), Arc::new(broker.clone())));
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        consumer.on_message(move |message| {
            let log = log_clone.clone();
            async move {
                let value = message.value_str().unwrap_or_default().to_string();
                log.lock().push(format!("start {}", value));
                tokio::time::sleep(Duration::from_secs(1)).await;
                log.lock().push(format!("end {}", value));
                Ok(())
            }
        });

        consumer.subscribe(["a"], SubscribeOptions::new()).await.unwrap();
        broker.publish("a", OutgoingRecord::new("slow"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let draining = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.disconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        consumer
            .subscribe(["a"], SubscribeOptions::new().from_beginning(true))
            .await
            .unwrap();
        draining.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        consumer.disconnect().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start slow", "end slow", "start slow", "end slow"]
        );
    }
}
