//! Topic administration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::session::LazySession;
use crate::transport::{TopicSpec, Transport};

const SERVICE: &str = "admin";

/// Lists and creates topics.
///
/// Connects on first use; the session stays open until `disconnect`.
#[derive(Debug)]
pub struct AdminService {
    session: LazySession,
}

impl AdminService {
    pub fn new(config: Arc<ConnectionConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            session: LazySession::new(config, transport, SERVICE),
        }
    }

    /// Names of all topics, sorted.
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        let session = self.session.get().await?;
        let mut topics = session.list_topics().await?;
        topics.sort();
        debug!(service = SERVICE, count = topics.len(), "Listed topics");
        Ok(topics)
    }

    pub async fn topic_exists(&self, topic: &str) -> Result<bool> {
        Ok(self.list_topics().await?.iter().any(|t| t == topic))
    }

    /// Create a topic. Returns `false` if it already existed.
    pub async fn create_topic(&self, spec: TopicSpec) -> Result<bool> {
        let session = self.session.get().await?;
        let created = session.create_topic(&spec).await?;
        if created {
            info!(
                service = SERVICE,
                topic = %spec.name,
                partitions = spec.partitions,
                replication_factor = spec.replication_factor,
                "Created topic"
            );
        } else {
            debug!(service = SERVICE, topic = %spec.name, "Topic already exists");
        }
        Ok(created)
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    /// Close the session. Does nothing if none is open.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.close().await
    }
}
