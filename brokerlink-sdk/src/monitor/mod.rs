//! The output monitor.
//!
//! The monitor runs its own subscription, separate from the consumer's. For
//! every record it:
//!
//! 1. asks the [`FlowClassifier`] whether the record is a flow output,
//! 2. updates the topic's [`TopicStats`] in one step,
//! 3. emits a `flow-output` event if the record matched.
//!
//! Statistics are read through copies ([`OutputMonitor::stats`],
//! [`OutputMonitor::stats_snapshot`]) and survive `disconnect` until the next
//! successful `start_monitoring`.

mod classify;
mod state;

pub use classify::{ClassificationError, FlowClassifier, JsonFieldClassifier};

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use brokerlink_types::{now_ms, ConsumedMessage, FlowOutput, StatsSnapshot, TopicStats};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result, TransportError};
use crate::events::{
    Connected, ErrorEvent, ErrorOrigin, ListenerPanic, ListenerRegistry, ListenerResult,
};
use crate::subscription::{ActiveSubscription, Handshake, RecordSink};
use crate::transport::{SubscriptionRequest, Transport};

use state::{Outcome, StatsRegistry};

const SERVICE: &str = "monitor";

/// Topic monitored when `start_monitoring` is given none.
pub const DEFAULT_MONITOR_TOPIC: &str = "flow-outputs";

/// Settings for an [`OutputMonitor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorOptions {
    topics: Vec<String>,
    group_id: Option<String>,
    from_beginning: bool,
}

impl MonitorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics monitored when `start_monitoring` is called without any.
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Consumer group to join. Defaults to `<client_id>-monitor`.
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    pub fn default_topics(&self) -> &[String] {
        &self.topics
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            topics: vec![DEFAULT_MONITOR_TOPIC.to_string()],
            group_id: None,
            from_beginning: false,
        }
    }
}

struct MonitorCore {
    classifier: Arc<dyn FlowClassifier>,
    stats: StatsRegistry,
    flow_output: ListenerRegistry<FlowOutput>,
    error: ListenerRegistry<ErrorEvent>,
}

impl MonitorCore {
    fn classify(&self, message: &ConsumedMessage) -> Result<Option<FlowOutput>, ClassificationError> {
        let classifier = &self.classifier;
        match std::panic::catch_unwind(AssertUnwindSafe(|| classifier.classify(message))) {
            Ok(result) => result,
            Err(payload) => Err(ClassificationError::Panicked(
                ListenerPanic::from_payload(payload).0,
            )),
        }
    }
}

#[async_trait]
impl RecordSink for MonitorCore {
    async fn on_connected(&self, connected: Connected) {
        debug!(service = SERVICE, topics = ?connected.topics, "Monitoring");
    }

    async fn on_record(&self, message: ConsumedMessage) {
        let received_ms = now_ms();
        let id = message.id();

        let classified = self.classify(&message);
        let outcome = match &classified {
            Ok(Some(_)) => Outcome::Flow,
            Ok(None) => Outcome::Ignored,
            Err(_) => Outcome::Failed,
        };
        self.stats.record(&message.topic, received_ms, outcome);

        match classified {
            Ok(Some(output)) => {
                debug!(service = SERVICE, flow = %output.flow, record = %id, "Flow output");
                let failures = self.flow_output.dispatch(output).await;
                self.error.report(SERVICE, Some(id), failures).await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(service = SERVICE, record = %id, error = %err, "Classification failed");
                let event = ErrorEvent::new(ErrorOrigin::Classification, Some(id), Arc::new(err));
                self.error.emit(SERVICE, event).await;
            }
        }
    }

    async fn on_transport_error(&self, error: TransportError) {
        let event = ErrorEvent::new(ErrorOrigin::Transport, None, Arc::new(error));
        self.error.emit(SERVICE, event).await;
    }
}

/// Watches topics for flow outputs and keeps per-topic statistics.
///
/// # Example
///
/// ```rust,no_run
/// use brokerlink_sdk::{BrokerClient, ConnectionConfig, MemoryBroker};
///
/// # async fn run() -> brokerlink_sdk::Result<()> {
/// let client = BrokerClient::new(ConnectionConfig::default(), MemoryBroker::new());
/// let monitor = client.monitor();
///
/// monitor.on_flow_output(|output| async move {
///     println!("flow {} reached {:?}", output.flow, output.stage);
///     Ok(())
/// });
/// monitor.start_monitoring(Some(vec!["orders".to_string()])).await?;
///
/// // later
/// let snapshot = monitor.stats_snapshot();
/// println!("{} messages seen", snapshot.total_messages());
/// # Ok(())
/// # }
/// ```
pub struct OutputMonitor {
    config: Arc<ConnectionConfig>,
    transport: Arc<dyn Transport>,
    options: MonitorOptions,
    core: Arc<MonitorCore>,
    active: tokio::sync::Mutex<Option<ActiveSubscription>>,
}

impl OutputMonitor {
    /// A monitor using [`JsonFieldClassifier::default`] and default options.
    pub fn new(config: Arc<ConnectionConfig>, transport: Arc<dyn Transport>) -> Self {
        Self::with_classifier(
            config,
            transport,
            Arc::new(JsonFieldClassifier::default()),
            MonitorOptions::default(),
        )
    }

    pub fn with_classifier(
        config: Arc<ConnectionConfig>,
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn FlowClassifier>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            config,
            transport,
            options,
            core: Arc::new(MonitorCore {
                classifier,
                stats: StatsRegistry::default(),
                flow_output: ListenerRegistry::new(),
                error: ListenerRegistry::new(),
            }),
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Start monitoring `topics`, or the configured default topics.
    ///
    /// Clears the statistics of any previous session once the subscription
    /// is established. Fails like [`ConsumerService::subscribe`](crate::ConsumerService::subscribe).
    pub async fn start_monitoring(&self, topics: Option<Vec<String>>) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(Error::AlreadySubscribed { service: SERVICE });
        }

        let request = SubscriptionRequest {
            topics: topics.unwrap_or_else(|| self.options.topics.clone()),
            group_id: self
                .options
                .group_id
                .clone()
                .unwrap_or_else(|| self.config.group_for(SERVICE)),
            from_beginning: self.options.from_beginning,
        };
        let handshake = Handshake::perform(self.transport.as_ref(), &self.config, request).await?;

        self.core.stats.reset();
        let subscription = handshake.start(self.core.clone(), SERVICE);
        info!(
            service = SERVICE,
            topics = ?subscription.topics(),
            group_id = subscription.group_id(),
            "Monitoring started"
        );
        *active = Some(subscription);
        Ok(())
    }

    /// Register a listener for classified records.
    pub fn on_flow_output<F, Fut>(&self, listener: F)
    where
        F: Fn(FlowOutput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.core.flow_output.register(listener);
    }

    /// Register a listener for classification, listener and transport failures.
    pub fn on_error<F, Fut>(&self, listener: F)
    where
        F: Fn(ErrorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        self.core.error.register(listener);
    }

    /// Statistics for one topic, if any record has been seen on it.
    pub fn stats(&self, topic: &str) -> Option<TopicStats> {
        self.core.stats.get(topic)
    }

    /// Statistics for every topic seen so far.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    pub async fn is_monitoring(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Stop monitoring. Same contract as [`ConsumerService::disconnect`](crate::ConsumerService::disconnect):
    /// a `start_monitoring` issued meanwhile waits, so statistics are never
    /// reset under a loop that is still running.
    pub async fn disconnect(&self) -> Result<()> {
        // Held until the old loop is gone so a new subscription cannot
        // dispatch alongside it.
        let mut active = self.active.lock().await;
        let Some(subscription) = active.take() else {
            debug!(service = SERVICE, "Disconnect requested while not monitoring");
            return Ok(());
        };

        let result = subscription.shutdown(self.config.drain_timeout()).await;
        match &result {
            Ok(()) => info!(service = SERVICE, "Monitoring stopped"),
            Err(err) => warn!(service = SERVICE, error = %err, "Disconnect failed"),
        }
        result.map_err(Error::from)
    }
}

impl std::fmt::Debug for OutputMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputMonitor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
