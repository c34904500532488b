//! In-process broker transport.
//!
//! [`MemoryBroker`] keeps partitioned topic logs in memory. Every publish is
//! also appended to a broker-wide journal, and each subscription reads the
//! journal through its own cursor. Publishing never waits on a subscriber: a
//! subscription that stops reading simply falls behind. It backs the
//! test-suite and is usable for embedding the client in a single process.
//!
//! Every subscription receives every record of its topics; consumer groups
//! are recorded but partitions are not balanced between group members.
//!
//! Faults can be injected to exercise error paths: an unreachable broker, a
//! slow handshake, failing unsubscribes, receive errors and connection loss.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brokerlink_types::{now_ms, ConsumedMessage};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::transport::{
    Ack, OutgoingRecord, Session, SubscriptionHandle, SubscriptionRequest, TopicSpec, Transport,
};

/// An in-memory broker. Cloning yields another handle to the same broker.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Debug)]
struct BrokerInner {
    /// Topic logs and the journal share one lock so journal order matches
    /// offset order within every partition.
    logs: Mutex<Logs>,
    subscribers: Mutex<Vec<Subscriber>>,
    faults: Mutex<Faults>,
    /// Journal length, watched by subscriptions waiting for new entries.
    appended: watch::Sender<usize>,
    next_subscriber: AtomicU64,
}

#[derive(Debug, Default)]
struct Logs {
    topics: BTreeMap<String, TopicLog>,
    journal: Vec<Entry>,
}

#[derive(Debug)]
enum Entry {
    Record(ConsumedMessage),
    /// A failure addressed to one subscription.
    Fault { subscriber: u64, error: TransportError },
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<ConsumedMessage>>,
    round_robin: usize,
}

impl TopicLog {
    fn new(partitions: i32) -> Self {
        Self {
            partitions: vec![Vec::new(); partitions.max(1) as usize],
            round_robin: 0,
        }
    }

    fn pick_partition(&mut self, key: Option<&[u8]>) -> usize {
        let count = self.partitions.len();
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % count as u64) as usize
            }
            None => {
                let partition = self.round_robin % count;
                self.round_robin = self.round_robin.wrapping_add(1);
                partition
            }
        }
    }

    fn append(&mut self, topic: &str, record: OutgoingRecord) -> ConsumedMessage {
        let partition = self.pick_partition(record.key.as_deref());
        let log = &mut self.partitions[partition];
        let message = ConsumedMessage {
            topic: topic.to_string(),
            partition: partition as i32,
            offset: log.len() as i64,
            key: record.key,
            value: Some(record.value),
            timestamp_ms: Some(now_ms()),
        };
        log.push(message.clone());
        message
    }

    fn records(&self) -> impl Iterator<Item = &ConsumedMessage> {
        self.partitions.iter().flatten()
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    group_id: String,
    topics: HashSet<String>,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    connect_delay: Option<Duration>,
    unsubscribe_failures: VecDeque<TransportError>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(BrokerInner {
                logs: Mutex::new(Logs::default()),
                subscribers: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                appended,
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Publish a record without going through a session.
    pub fn publish(&self, topic: &str, record: OutgoingRecord) -> Ack {
        self.inner.publish(topic, record)
    }

    /// Every record stored for a topic, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<ConsumedMessage> {
        self.inner
            .logs
            .lock()
            .topics
            .get(topic)
            .map(|log| log.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Consumer groups of the live subscriptions.
    pub fn active_groups(&self) -> Vec<String> {
        self.inner
            .subscribers
            .lock()
            .iter()
            .map(|s| s.group_id.clone())
            .collect()
    }

    /// Make new connection attempts fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.faults.lock().unreachable = unreachable;
    }

    /// Delay every connection attempt.
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().connect_delay = delay;
    }

    /// Make the next unsubscribe fail with `error`.
    pub fn fail_next_unsubscribe(&self, error: TransportError) {
        self.inner.faults.lock().unsubscribe_failures.push_back(error);
    }

    /// Deliver a receive error to every subscription of `topic`, after the
    /// records already published.
    pub fn inject_receive_error(&self, topic: &str, reason: &str) {
        let targets: Vec<u64> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.topics.contains(topic))
            .map(|s| s.id)
            .collect();
        self.inner
            .push_faults(targets, TransportError::Receive(reason.to_string()));
    }

    /// Deliver a connection loss to every live subscription.
    pub fn drop_connections(&self) {
        let targets: Vec<u64> = self.inner.subscribers.lock().iter().map(|s| s.id).collect();
        self.inner.push_faults(
            targets,
            TransportError::Connection("connection lost".to_string()),
        );
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerInner {
    fn publish(&self, topic: &str, record: OutgoingRecord) -> Ack {
        let (message, len) = {
            let mut logs = self.logs.lock();
            let message = logs
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(1))
                .append(topic, record);
            logs.journal.push(Entry::Record(message.clone()));
            (message, logs.journal.len())
        };
        self.appended.send_replace(len);

        Ack {
            topic: message.topic,
            partition: message.partition,
            offset: message.offset,
        }
    }

    fn push_faults(&self, subscribers: Vec<u64>, error: TransportError) {
        if subscribers.is_empty() {
            return;
        }
        let len = {
            let mut logs = self.logs.lock();
            for subscriber in subscribers {
                logs.journal.push(Entry::Fault {
                    subscriber,
                    error: error.clone(),
                });
            }
            logs.journal.len()
        };
        self.appended.send_replace(len);
    }

    /// The next journal entry addressed to a subscription, advancing its
    /// cursor past everything skipped.
    fn next_for(
        &self,
        id: u64,
        topics: &HashSet<String>,
        cursor: &mut usize,
    ) -> Option<Result<ConsumedMessage, TransportError>> {
        let logs = self.logs.lock();
        while let Some(entry) = logs.journal.get(*cursor) {
            *cursor += 1;
            match entry {
                Entry::Record(message) if topics.contains(&message.topic) => {
                    return Some(Ok(message.clone()));
                }
                Entry::Fault { subscriber, error } if *subscriber == id => {
                    return Some(Err(error.clone()));
                }
                _ => {}
            }
        }
        None
    }

    fn remove_subscriber(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, TransportError> {
        let (unreachable, delay) = {
            let faults = self.inner.faults.lock();
            (faults.unreachable, faults.connect_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(TransportError::Connection(format!(
                "broker {} unreachable",
                config.bootstrap_servers()
            )));
        }

        debug!(client_id = config.client_id(), "memory session opened");
        Ok(Box::new(MemorySession {
            broker: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    broker: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn subscribe(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<Box<dyn SubscriptionHandle>, TransportError> {
        self.ensure_open()?;
        if request.topics.is_empty() {
            return Err(TransportError::Subscription("empty topic set".to_string()));
        }

        let topics: HashSet<String> = request.topics.iter().cloned().collect();
        let id = self.broker.next_subscriber.fetch_add(1, Ordering::Relaxed);

        // Reading the cursor under the log lock leaves no gap between the
        // records before it and live delivery.
        let cursor = {
            let logs = self.broker.logs.lock();
            self.broker.subscribers.lock().push(Subscriber {
                id,
                group_id: request.group_id.clone(),
                topics: topics.clone(),
            });
            if request.from_beginning {
                0
            } else {
                logs.journal.len()
            }
        };

        Ok(Box::new(MemorySubscription {
            id,
            broker: self.broker.clone(),
            topics,
            cursor,
            appended: self.broker.appended.subscribe(),
            closed: false,
        }))
    }

    async fn publish(&self, topic: &str, record: OutgoingRecord) -> Result<Ack, TransportError> {
        self.ensure_open()?;
        if topic.is_empty() {
            return Err(TransportError::Publish("topic name is empty".to_string()));
        }
        Ok(self.broker.publish(topic, record))
    }

    async fn list_topics(&self) -> Result<Vec<String>, TransportError> {
        self.ensure_open()?;
        Ok(self.broker.logs.lock().topics.keys().cloned().collect())
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<bool, TransportError> {
        self.ensure_open()?;
        if spec.partitions < 1 {
            return Err(TransportError::Admin(format!(
                "topic '{}' needs at least one partition",
                spec.name
            )));
        }

        let mut logs = self.broker.logs.lock();
        if logs.topics.contains_key(&spec.name) {
            return Ok(false);
        }
        logs.topics
            .insert(spec.name.clone(), TopicLog::new(spec.partitions));
        Ok(true)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemorySubscription {
    id: u64,
    broker: Arc<BrokerInner>,
    topics: HashSet<String>,
    cursor: usize,
    appended: watch::Receiver<usize>,
    closed: bool,
}

#[async_trait]
impl SubscriptionHandle for MemorySubscription {
    async fn receive_next(&mut self) -> Result<ConsumedMessage, TransportError> {
        loop {
            if self.closed {
                return Err(TransportError::Closed);
            }
            // Mark the current length seen before scanning so an append
            // racing the scan still wakes the wait below.
            let _ = self.appended.borrow_and_update();
            if let Some(delivery) = self.broker.next_for(self.id, &self.topics, &mut self.cursor) {
                return delivery;
            }
            if self.appended.changed().await.is_err() {
                return Err(TransportError::Closed);
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.broker.remove_subscriber(self.id);

        match self.broker.faults.lock().unsubscribe_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.remove_subscriber(self.id);
        }
    }
}
