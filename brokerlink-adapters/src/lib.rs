//! # brokerlink-adapters
//!
//! Broker transports for `brokerlink-sdk` backed by native client libraries.
//!
//! ## Supported Systems
//!
//! - **Kafka** (`kafka` feature) - subscriptions, publishes and topic
//!   administration through librdkafka, with SASL and TLS taken from the
//!   shared [`ConnectionConfig`](brokerlink_sdk::ConnectionConfig)
//!
//! ## Quick Start (Kafka)
//!
//! ```rust,ignore
//! use brokerlink_adapters::kafka::KafkaTransport;
//! use brokerlink_sdk::{BrokerClient, ConnectionConfig, SubscribeOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::builder()
//!         .broker("localhost:9092")
//!         .client_id("orders-service")
//!         .build()?;
//!     let client = BrokerClient::new(config, KafkaTransport::builder().build()?);
//!
//!     client.consumer().subscribe(["orders"], SubscribeOptions::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod error;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use error::AdapterError;
