//! Kafka transport built on rdkafka (librdkafka bindings).
//!
//! [`KafkaTransport`] implements the brokerlink [`Transport`] trait, so a
//! [`BrokerClient`](brokerlink_sdk::BrokerClient) can run against a real
//! Kafka cluster.
//!
//! - Connecting creates a producer and an admin client and fetches cluster
//!   metadata to prove the brokers are reachable.
//! - Each subscription gets its own `StreamConsumer` in the requested
//!   consumer group.
//! - Publishes wait for the delivery report.
//!
//! ## Example
//!
//! ```rust,no_run
//! use brokerlink_adapters::kafka::KafkaTransport;
//! use brokerlink_sdk::{BrokerClient, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = KafkaTransport::builder()
//!         .option("compression.type", "lz4")
//!         .build()?;
//!
//!     let client = BrokerClient::new(ConnectionConfig::load(None)?, transport);
//!     println!("{:?}", client.admin().list_topics().await?);
//!
//!     client.disconnect().await.into_result()?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use tracing::{debug, info};

use brokerlink_sdk::{
    Ack, ConnectionConfig, OutgoingRecord, Session, SubscriptionHandle, SubscriptionRequest,
    TopicSpec, Transport, TransportError,
};
use brokerlink_types::ConsumedMessage;

use crate::AdapterError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`Transport`] that talks to Kafka through librdkafka.
#[derive(Clone)]
pub struct KafkaTransport {
    options: BTreeMap<String, String>,
    request_timeout: Duration,
}

impl KafkaTransport {
    /// Create a new builder for configuring the transport.
    pub fn builder() -> KafkaTransportBuilder {
        KafkaTransportBuilder::default()
    }

    /// librdkafka properties derived from `config`, then the extra options.
    fn client_config(&self, config: &ConnectionConfig) -> ClientConfig {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", config.bootstrap_servers());
        client.set("client.id", config.client_id());
        client.set("security.protocol", security_protocol(config));

        if let Some(credentials) = config.credentials() {
            client.set("sasl.mechanism", credentials.mechanism.as_str());
            client.set("sasl.username", &credentials.username);
            client.set("sasl.password", &credentials.password);
        }

        for (key, value) in &self.options {
            client.set(key, value);
        }
        client
    }
}

impl std::fmt::Debug for KafkaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaTransport")
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn security_protocol(config: &ConnectionConfig) -> &'static str {
    match (config.ssl(), config.credentials().is_some()) {
        (false, false) => "plaintext",
        (true, false) => "ssl",
        (false, true) => "sasl_plaintext",
        (true, true) => "sasl_ssl",
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, TransportError> {
        let base = self.client_config(config);

        let producer: FutureProducer = base.create().map_err(AdapterError::from)?;
        let admin: AdminClient<DefaultClientContext> = base.create().map_err(AdapterError::from)?;

        // Metadata requests block the calling thread.
        let metadata_producer = producer.clone();
        let timeout = config.connect_timeout();
        let metadata = tokio::task::spawn_blocking(move || {
            metadata_producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| AdapterError::Client(e.to_string()))?
        .map_err(AdapterError::from)?;

        info!(
            brokers = %config.bootstrap_servers(),
            reachable = metadata,
            "Connected to Kafka"
        );

        Ok(Box::new(KafkaSession {
            base,
            producer,
            admin,
            request_timeout: self.request_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

struct KafkaSession {
    base: ClientConfig,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl KafkaSession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Session for KafkaSession {
    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Box<dyn SubscriptionHandle>, TransportError> {
        self.ensure_open()?;

        let mut config = self.base.clone();
        config
            .set("group.id", &request.group_id)
            .set(
                "auto.offset.reset",
                if request.from_beginning { "earliest" } else { "latest" },
            )
            .set("enable.partition.eof", "false");

        let consumer: StreamConsumer = config.create().map_err(AdapterError::from)?;
        let topics: Vec<&str> = request.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| TransportError::Subscription(e.to_string()))?;

        debug!(topics = ?request.topics, group_id = %request.group_id, "Kafka consumer subscribed");
        Ok(Box::new(KafkaSubscription {
            consumer,
            closed: false,
        }))
    }

    async fn publish(&self, topic: &str, record: OutgoingRecord) -> Result<Ack, TransportError> {
        self.ensure_open()?;

        let mut outgoing = FutureRecord::to(topic).payload(&record.value);
        if let Some(key) = record.key.as_deref() {
            outgoing = outgoing.key(key);
        }

        match self
            .producer
            .send(outgoing, Timeout::After(self.request_timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Ack {
                topic: topic.to_string(),
                partition,
                offset,
            }),
            Err((err, _)) => Err(TransportError::Publish(err.to_string())),
        }
    }

    async fn list_topics(&self) -> Result<Vec<String>, TransportError> {
        self.ensure_open()?;

        let metadata_producer = self.producer.clone();
        let timeout = self.request_timeout;
        let topics = tokio::task::spawn_blocking(move || {
            metadata_producer.client().fetch_metadata(None, timeout).map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|topic| topic.name().to_string())
                    .filter(|name| !name.starts_with("__"))
                    .collect::<Vec<_>>()
            })
        })
        .await
        .map_err(|e| TransportError::Admin(e.to_string()))?
        .map_err(AdapterError::from)?;

        Ok(topics)
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<bool, TransportError> {
        self.ensure_open()?;

        let topic = NewTopic::new(
            &spec.name,
            spec.partitions,
            TopicReplication::Fixed(spec.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.request_timeout)));

        let results = self
            .admin
            .create_topics([&topic], &options)
            .await
            .map_err(AdapterError::from)?;

        match results.into_iter().next() {
            Some(Ok(_)) => Ok(true),
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => Ok(false),
            Some(Err((name, code))) => Err(TransportError::Admin(format!(
                "creating topic '{}' failed: {}",
                name, code
            ))),
            None => Err(TransportError::Admin(format!(
                "no result for topic '{}'",
                spec.name
            ))),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let producer = self.producer.clone();
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer,
    closed: bool,
}

#[async_trait]
impl SubscriptionHandle for KafkaSubscription {
    async fn receive_next(&mut self) -> Result<ConsumedMessage, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.consumer.recv().await {
            Ok(message) => Ok(to_consumed(&message)),
            Err(err) => Err(receive_error(err)),
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.consumer.unsubscribe();
        Ok(())
    }
}

fn to_consumed(message: &BorrowedMessage<'_>) -> ConsumedMessage {
    ConsumedMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        timestamp_ms: message.timestamp().to_millis(),
    }
}

fn receive_error(err: KafkaError) -> TransportError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::Fatal) => {
            TransportError::Connection(err.to_string())
        }
        _ => TransportError::Receive(err.to_string()),
    }
}

/// Builder for KafkaTransport.
#[derive(Debug, Default)]
pub struct KafkaTransportBuilder {
    options: BTreeMap<String, String>,
    request_timeout: Option<Duration>,
}

impl KafkaTransportBuilder {
    /// Set a librdkafka property, e.g. `compression.type`.
    ///
    /// Applied after the properties derived from the connection config, so
    /// it overrides them.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set the publish, admin and metadata request timeout (default: 30 seconds).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<KafkaTransport, AdapterError> {
        if let Some(key) = self.options.keys().find(|key| key.trim().is_empty()) {
            return Err(AdapterError::Config(format!("empty property name {:?}", key)));
        }
        if self.options.contains_key("group.id") {
            return Err(AdapterError::Config(
                "group.id is chosen per subscription".to_string(),
            ));
        }

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(AdapterError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        Ok(KafkaTransport {
            options: self.options,
            request_timeout,
        })
    }
}
