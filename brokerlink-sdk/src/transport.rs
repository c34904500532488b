//! Broker transport abstraction.
//!
//! The client services never speak a broker protocol themselves. They drive
//! a [`Transport`], which opens [`Session`]s, which in turn open
//! [`SubscriptionHandle`]s. The in-process [`MemoryBroker`](crate::MemoryBroker)
//! and the rdkafka adapter in `brokerlink-adapters` both implement these
//! traits.

use std::fmt::Debug;

use async_trait::async_trait;
use brokerlink_types::ConsumedMessage;

use crate::config::ConnectionConfig;
use crate::error::TransportError;

/// A record to publish.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl OutgoingRecord {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Broker acknowledgment of a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Topic creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    /// A single-partition, single-replica topic.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication_factor: 1,
        }
    }

    pub fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }
}

/// Where a new subscription starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub topics: Vec<String>,
    pub group_id: String,
    /// Read from the earliest retained offset instead of only new records.
    pub from_beginning: bool,
}

/// Factory for broker sessions.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Open a session. Fails with [`TransportError::Connection`] if the
    /// broker is unreachable.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, TransportError>;
}

/// An open connection to the broker.
#[async_trait]
pub trait Session: Send + Sync {
    /// Bind to a set of topics under a consumer group.
    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Box<dyn SubscriptionHandle>, TransportError>;

    /// Publish one record and wait for the acknowledgment.
    async fn publish(&self, topic: &str, record: OutgoingRecord) -> Result<Ack, TransportError>;

    /// Names of all topics known to the broker.
    async fn list_topics(&self) -> Result<Vec<String>, TransportError>;

    /// Create a topic. Returns `false` if it already existed.
    async fn create_topic(&self, spec: &TopicSpec) -> Result<bool, TransportError>;

    /// Close the session. Calling this more than once is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A live subscription.
#[async_trait]
pub trait SubscriptionHandle: Send {
    /// Wait for the next record.
    ///
    /// Must be cancel-safe: dropping the future before it completes must not
    /// lose a record.
    async fn receive_next(&mut self) -> Result<ConsumedMessage, TransportError>;

    /// Release the subscription's partitions.
    async fn unsubscribe(&mut self) -> Result<(), TransportError>;
}
