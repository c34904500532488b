//! Publishing records.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::session::LazySession;
use crate::transport::{Ack, OutgoingRecord, Transport};

const SERVICE: &str = "producer";

/// Publishes records and waits for the broker's acknowledgment.
///
/// Connects on first use; the session stays open until `disconnect`.
#[derive(Debug)]
pub struct ProducerService {
    session: LazySession,
}

impl ProducerService {
    pub fn new(config: Arc<ConnectionConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            session: LazySession::new(config, transport, SERVICE),
        }
    }

    /// Publish one record.
    pub async fn send(&self, topic: &str, record: OutgoingRecord) -> Result<Ack> {
        let session = self.session.get().await?;
        match session.publish(topic, record).await {
            Ok(ack) => {
                debug!(
                    service = SERVICE,
                    topic,
                    partition = ack.partition,
                    offset = ack.offset,
                    "Published"
                );
                Ok(ack)
            }
            Err(source) => {
                warn!(service = SERVICE, topic, error = %source, "Publish failed");
                Err(Error::Publish {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    /// Publish `value` encoded as JSON.
    pub async fn send_json<T>(&self, topic: &str, value: &T) -> Result<Ack>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, OutgoingRecord::new(payload)).await
    }

    /// Publish records in order, stopping at the first failure.
    pub async fn send_batch<I>(&self, topic: &str, records: I) -> Result<Vec<Ack>>
    where
        I: IntoIterator<Item = OutgoingRecord>,
    {
        let mut acks = Vec::new();
        for record in records {
            acks.push(self.send(topic, record).await?);
        }
        Ok(acks)
    }

    pub async fn is_connected(&self) -> bool {
        self.session.is_connected().await
    }

    /// Close the session. Does nothing if none is open.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.close().await
    }
}
