//! Error types for adapters.

use brokerlink_sdk::TransportError;
use thiserror::Error;

/// Errors raised while building or driving an adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// A client option was rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The broker could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for the broker.
    #[error("Request timed out")]
    Timeout,

    /// The native client reported an error.
    #[error("Client error: {0}")]
    Client(String),
}

impl From<AdapterError> for TransportError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Connection(reason) => TransportError::Connection(reason),
            AdapterError::Timeout => TransportError::Connection("request timed out".to_string()),
            other => TransportError::Admin(other.to_string()),
        }
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for AdapterError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::KafkaError;
        use rdkafka::types::RDKafkaErrorCode;

        match err {
            KafkaError::ClientConfig(..) => AdapterError::Config(err.to_string()),
            KafkaError::ClientCreation(reason) => AdapterError::Connection(reason),
            _ => match err.rdkafka_error_code() {
                Some(RDKafkaErrorCode::OperationTimedOut) | Some(RDKafkaErrorCode::RequestTimedOut) => {
                    AdapterError::Timeout
                }
                Some(RDKafkaErrorCode::AllBrokersDown) | Some(RDKafkaErrorCode::BrokerTransportFailure) => {
                    AdapterError::Connection(err.to_string())
                }
                _ => AdapterError::Client(err.to_string()),
            },
        }
    }
}
