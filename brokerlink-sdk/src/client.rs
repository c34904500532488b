//! The client facade tying the four services together.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::admin::AdminService;
use crate::config::ConnectionConfig;
use crate::consumer::ConsumerService;
use crate::error::{Error, Result};
use crate::monitor::{FlowClassifier, JsonFieldClassifier, MonitorOptions, OutputMonitor};
use crate::producer::ProducerService;
use crate::transport::Transport;

/// One of the services owned by a [`BrokerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    Admin,
    Producer,
    Consumer,
    Monitor,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Admin,
        ServiceKind::Producer,
        ServiceKind::Consumer,
        ServiceKind::Monitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Admin => "admin",
            ServiceKind::Producer => "producer",
            ServiceKind::Consumer => "consumer",
            ServiceKind::Monitor => "monitor",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`BrokerClient::disconnect`], one result per service.
#[derive(Debug)]
pub struct DisconnectReport {
    pub admin: Result<()>,
    pub producer: Result<()>,
    pub consumer: Result<()>,
    pub monitor: Result<()>,
}

impl DisconnectReport {
    pub fn result(&self, kind: ServiceKind) -> &Result<()> {
        match kind {
            ServiceKind::Admin => &self.admin,
            ServiceKind::Producer => &self.producer,
            ServiceKind::Consumer => &self.consumer,
            ServiceKind::Monitor => &self.monitor,
        }
    }

    /// True if every service disconnected cleanly.
    pub fn is_success(&self) -> bool {
        ServiceKind::ALL.iter().all(|kind| self.result(*kind).is_ok())
    }

    pub fn succeeded(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .into_iter()
            .filter(|kind| self.result(*kind).is_ok())
            .collect()
    }

    pub fn failures(&self) -> Vec<(ServiceKind, &Error)> {
        ServiceKind::ALL
            .into_iter()
            .filter_map(|kind| self.result(kind).as_ref().err().map(|err| (kind, err)))
            .collect()
    }

    /// Collapse into a single result naming every failed service.
    pub fn into_result(self) -> std::result::Result<(), DisconnectError> {
        let failures: Vec<(ServiceKind, Error)> = [
            (ServiceKind::Admin, self.admin),
            (ServiceKind::Producer, self.producer),
            (ServiceKind::Consumer, self.consumer),
            (ServiceKind::Monitor, self.monitor),
        ]
        .into_iter()
        .filter_map(|(kind, result)| result.err().map(|err| (kind, err)))
        .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DisconnectError { failures })
        }
    }
}

/// One or more services failed to disconnect.
#[derive(Debug, Error)]
#[error("{} service(s) failed to disconnect: {}", .failures.len(), describe(.failures))]
pub struct DisconnectError {
    pub failures: Vec<(ServiceKind, Error)>,
}

fn describe(failures: &[(ServiceKind, Error)]) -> String {
    failures
        .iter()
        .map(|(kind, err)| format!("{}: {}", kind, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A publish/subscribe client made of four services sharing one
/// configuration and one transport.
///
/// # Example
///
/// ```rust
/// use brokerlink_sdk::{BrokerClient, ConnectionConfig, MemoryBroker};
///
/// # tokio_test::block_on(async {
/// let client = BrokerClient::new(ConnectionConfig::default(), MemoryBroker::new());
///
/// client.producer().send_json("orders", &serde_json::json!({"id": 1})).await?;
/// assert!(client.admin().topic_exists("orders").await?);
///
/// let report = client.disconnect().await;
/// assert!(report.is_success());
/// # Ok::<(), brokerlink_sdk::Error>(())
/// # }).unwrap();
/// ```
pub struct BrokerClient {
    config: Arc<ConnectionConfig>,
    admin: AdminService,
    producer: ProducerService,
    consumer: ConsumerService,
    monitor: OutputMonitor,
}

impl BrokerClient {
    /// A client with the default flow classifier and monitor options.
    pub fn new<T>(config: ConnectionConfig, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::builder(config).build(transport)
    }

    pub fn builder(config: ConnectionConfig) -> BrokerClientBuilder {
        BrokerClientBuilder::new(config)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    pub fn producer(&self) -> &ProducerService {
        &self.producer
    }

    pub fn consumer(&self) -> &ConsumerService {
        &self.consumer
    }

    pub fn monitor(&self) -> &OutputMonitor {
        &self.monitor
    }

    /// Disconnect all four services concurrently.
    ///
    /// Every service is disconnected even if others fail; the report holds
    /// each outcome.
    pub async fn disconnect(&self) -> DisconnectReport {
        let (admin, producer, consumer, monitor) = tokio::join!(
            self.admin.disconnect(),
            self.producer.disconnect(),
            self.consumer.disconnect(),
            self.monitor.disconnect(),
        );
        let report = DisconnectReport {
            admin,
            producer,
            consumer,
            monitor,
        };

        if report.is_success() {
            info!("All services disconnected");
        } else {
            for (kind, err) in report.failures() {
                warn!(service = %kind, error = %err, "Service failed to disconnect");
            }
        }
        report
    }
}

impl fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field("config", &self.config)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`BrokerClient`].
pub struct BrokerClientBuilder {
    config: ConnectionConfig,
    classifier: Option<Arc<dyn FlowClassifier>>,
    monitor_options: MonitorOptions,
}

impl BrokerClientBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            classifier: None,
            monitor_options: MonitorOptions::default(),
        }
    }

    /// Classifier used by the output monitor. Defaults to
    /// [`JsonFieldClassifier::default`].
    pub fn classifier(mut self, classifier: impl FlowClassifier) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn monitor_options(mut self, options: MonitorOptions) -> Self {
        self.monitor_options = options;
        self
    }

    pub fn build<T>(self, transport: T) -> BrokerClient
    where
        T: Transport + 'static,
    {
        let config = Arc::new(self.config);
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(JsonFieldClassifier::default()));

        BrokerClient {
            admin: AdminService::new(config.clone(), transport.clone()),
            producer: ProducerService::new(config.clone(), transport.clone()),
            consumer: ConsumerService::new(config.clone(), transport.clone()),
            monitor: OutputMonitor::with_classifier(
                config.clone(),
                transport,
                classifier,
                self.monitor_options,
            ),
            config,
        }
    }
}

impl fmt::Debug for BrokerClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClientBuilder")
            .field("config", &self.config)
            .field("custom_classifier", &self.classifier.is_some())
            .field("monitor_options", &self.monitor_options)
            .finish()
    }
}
