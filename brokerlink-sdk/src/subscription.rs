//! The receive loop shared by the consumer and the output monitor.
//!
//! A subscription is one session, one [`SubscriptionHandle`] and one tokio
//! task. The task pulls records one at a time and hands each to a
//! [`RecordSink`], awaiting it before pulling the next record. Stopping is
//! cooperative: the task finishes the record in hand, then exits and returns
//! the handle so it can be released.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_types::ConsumedMessage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result, TransportError};
use crate::events::Connected;
use crate::session::{connect, connection_error};
use crate::transport::{Session, SubscriptionHandle, SubscriptionRequest, Transport};

/// Receives everything a subscription produces.
#[async_trait]
pub(crate) trait RecordSink: Send + Sync + 'static {
    /// Called once, before the first record.
    async fn on_connected(&self, connected: Connected);

    /// Called for each record, in delivery order.
    async fn on_record(&self, message: ConsumedMessage);

    /// Called for each receive failure.
    async fn on_transport_error(&self, error: TransportError);
}

/// A session with a bound subscription whose loop has not started yet.
pub(crate) struct Handshake {
    session: Box<dyn Session>,
    handle: Box<dyn SubscriptionHandle>,
    request: SubscriptionRequest,
}

impl Handshake {
    /// Connect and subscribe within the configured connect timeout.
    pub(crate) async fn perform(
        transport: &dyn Transport,
        config: &ConnectionConfig,
        request: SubscriptionRequest,
    ) -> Result<Self> {
        if request.topics.is_empty() {
            return Err(Error::NoTopics);
        }

        let started = tokio::time::Instant::now();
        let session = connect(transport, config).await?;

        let remaining = config.connect_timeout().saturating_sub(started.elapsed());
        let subscribed = tokio::time::timeout(remaining, session.subscribe(&request)).await;
        let handle = match subscribed {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                let _ = session.close().await;
                return Err(connection_error(err));
            }
            Err(_) => {
                let _ = session.close().await;
                return Err(Error::Connection(format!(
                    "subscribing to {:?} timed out after {:?}",
                    request.topics,
                    config.connect_timeout()
                )));
            }
        };

        Ok(Self {
            session,
            handle,
            request,
        })
    }

    /// Spawn the receive loop.
    pub(crate) fn start(self, sink: Arc<dyn RecordSink>, service: &'static str) -> ActiveSubscription {
        let (stop_tx, stop_rx) = watch::channel(false);
        let connected = Connected {
            topics: self.request.topics.clone(),
            group_id: self.request.group_id.clone(),
        };
        let task = tokio::spawn(receive_loop(self.handle, sink, stop_rx, connected, service));

        ActiveSubscription {
            session: self.session,
            request: self.request,
            stop_tx,
            task,
            service,
        }
    }
}

/// A running subscription, owned by the service that opened it.
pub(crate) struct ActiveSubscription {
    session: Box<dyn Session>,
    request: SubscriptionRequest,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<Box<dyn SubscriptionHandle>>,
    service: &'static str,
}

impl ActiveSubscription {
    pub(crate) fn topics(&self) -> &[String] {
        &self.request.topics
    }

    pub(crate) fn group_id(&self) -> &str {
        &self.request.group_id
    }

    /// Stop the loop, wait up to `grace` for the record in hand, then
    /// release the subscription and close the session.
    ///
    /// Both release steps run even if the first fails; the first failure
    /// is returned.
    pub(crate) async fn shutdown(self, grace: Duration) -> Result<(), TransportError> {
        let ActiveSubscription {
            session,
            stop_tx,
            mut task,
            service,
            ..
        } = self;

        let _ = stop_tx.send(true);

        let unsubscribed = match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(mut handle)) => handle.unsubscribe().await,
            Ok(Err(join_error)) => {
                error!(service, %join_error, "Receive loop ended abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(service, ?grace, "Listeners still running after grace period; aborting loop");
                task.abort();
                Ok(())
            }
        };

        let closed = session.close().await;
        unsubscribed.and(closed)
    }
}

async fn receive_loop(
    mut handle: Box<dyn SubscriptionHandle>,
    sink: Arc<dyn RecordSink>,
    mut stop_rx: watch::Receiver<bool>,
    connected: Connected,
    service: &'static str,
) -> Box<dyn SubscriptionHandle> {
    info!(
        service,
        topics = ?connected.topics,
        group_id = %connected.group_id,
        "Subscription started"
    );
    sink.on_connected(connected).await;

    loop {
        let received = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            received = handle.receive_next() => received,
        };

        match received {
            Ok(message) => {
                debug!(
                    service,
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Record received"
                );
                sink.on_record(message).await;
            }
            Err(err) if err.is_fatal() => {
                error!(service, error = %err, "Subscription lost");
                sink.on_transport_error(err).await;
                break;
            }
            Err(err) => {
                warn!(service, error = %err, "Receive failed; continuing");
                sink.on_transport_error(err).await;
            }
        }
    }

    info!(service, "Subscription loop stopped");
    handle
}
