//! # brokerlink-sdk
//!
//! A publish/subscribe client built from four services that share one
//! configuration and one broker transport:
//!
//! - [`AdminService`]: list and create topics
//! - [`ProducerService`]: publish records, raw or JSON-encoded
//! - [`ConsumerService`]: subscribe to topics and receive `message`,
//!   `connected` and `error` events
//! - [`OutputMonitor`]: classify records into flow outputs and keep
//!   per-topic statistics
//!
//! [`BrokerClient`] owns one of each and disconnects them together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use brokerlink_sdk::{BrokerClient, ConnectionConfig, MemoryBroker, SubscribeOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::load(None)?;
//!     let client = BrokerClient::new(config, MemoryBroker::new());
//!
//!     client.consumer().on_message(|message| async move {
//!         println!("{} -> {:?}", message.id(), message.value_str());
//!         Ok(())
//!     });
//!     client.consumer().subscribe(["orders"], SubscribeOptions::new()).await?;
//!
//!     client.producer().send_json("orders", &serde_json::json!({"id": 1})).await?;
//!
//!     client.disconnect().await.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Event delivery
//!
//! Each subscription runs in its own tokio task. Records are handed to
//! listeners one at a time and every listener is awaited before the next
//! record is received. A listener that fails or panics produces an `error`
//! event; delivery continues with the next record.
//!
//! ## Transports
//!
//! Services talk to the broker through the [`Transport`] trait.
//! [`MemoryBroker`] is an in-process implementation; `brokerlink-adapters`
//! provides one backed by librdkafka.

mod admin;
mod client;
mod config;
mod consumer;
mod error;
mod events;
mod memory;
mod monitor;
mod producer;
mod session;
mod subscription;
mod transport;

pub use admin::AdminService;
pub use client::{BrokerClient, BrokerClientBuilder, DisconnectError, DisconnectReport, ServiceKind};
pub use crate::config::{ConfigError, ConnectionConfig, ConnectionConfigBuilder, Credentials, SaslMechanism, ENV_PREFIX};
pub use consumer::{ConsumerService, SubscribeOptions};
pub use error::{Error, Result, TransportError};
pub use events::{
    Connected, ErrorEvent, ErrorOrigin, ListenerError, ListenerFailure, ListenerPanic,
    ListenerRegistry, ListenerResult,
};
pub use memory::MemoryBroker;
pub use monitor::{
    ClassificationError, FlowClassifier, JsonFieldClassifier, MonitorOptions, OutputMonitor,
    DEFAULT_MONITOR_TOPIC,
};
pub use producer::ProducerService;
pub use transport::{Ack, OutgoingRecord, Session, SubscriptionHandle, SubscriptionRequest, TopicSpec, Transport};

// Re-export types for convenience
pub use brokerlink_types::{
    now_ms, ConsumedMessage, FlowOutput, MessageId, SchemaVersion, StatsSnapshot, TopicStats,
};
