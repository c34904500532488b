//! Error types for the client services.

use thiserror::Error;

/// Errors reported by a broker transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker cannot be reached or the connection was lost.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The broker rejected a subscription.
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// A single receive failed; the subscription is still usable.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// A publish was not acknowledged.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A topic administration request failed.
    #[error("Admin request failed: {0}")]
    Admin(String),

    /// The session or subscription has already been closed.
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// True if the subscription cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Closed)
    }
}

/// Errors surfaced to callers of the client services.
#[derive(Debug, Error)]
pub enum Error {
    /// The broker could not be reached during connect or subscribe.
    #[error("Connection error: {0}")]
    Connection(String),

    /// `subscribe`/`start_monitoring` was called on an active service.
    #[error("{service} is already subscribed; disconnect first")]
    AlreadySubscribed { service: &'static str },

    /// A subscription was requested for an empty topic set.
    #[error("At least one topic is required")]
    NoTopics,

    /// A publish was rejected or not acknowledged.
    #[error("Publish to '{topic}' failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },

    /// Any other transport failure, including failed disconnects.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A value could not be encoded as JSON.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// True for errors caused by an unreachable broker.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Transport(TransportError::Connection(_))
        )
    }
}

/// Result alias for client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
