//! StatsSnapshot - a point-in-time copy of the output monitor's statistics.

use std::collections::BTreeMap;

use crate::{now_ms, SchemaVersion, TopicStats};

/// A point-in-time copy of per-topic statistics.
///
/// Snapshots are detached from the monitor: holding one never blocks the
/// monitor's receive loop, and later messages never change it.
///
/// # Example
///
/// ```rust
/// use brokerlink_types::{StatsSnapshot, TopicStats};
///
/// let snapshot = StatsSnapshot::builder()
///     .topic(TopicStats::builder("orders").count(500).build())
///     .topic(TopicStats::builder("payments").count(20).flow_outputs(20).build())
///     .build();
///
/// assert_eq!(snapshot.len(), 2);
/// assert_eq!(snapshot.total_messages(), 520);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatsSnapshot {
    /// Schema version for forward compatibility.
    pub version: SchemaVersion,

    /// Unix timestamp in milliseconds when the snapshot was taken.
    pub timestamp_ms: i64,

    /// Statistics keyed by topic name.
    pub topics: BTreeMap<String, TopicStats>,
}

impl StatsSnapshot {
    /// Create an empty snapshot stamped with the current time.
    pub fn new() -> Self {
        Self::with_timestamp(now_ms())
    }

    /// Create an empty snapshot with a specific timestamp.
    pub fn with_timestamp(timestamp_ms: i64) -> Self {
        Self {
            version: SchemaVersion::CURRENT,
            timestamp_ms,
            topics: BTreeMap::new(),
        }
    }

    /// Create a builder for constructing snapshots.
    pub fn builder() -> StatsSnapshotBuilder {
        StatsSnapshotBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Number of topics in the snapshot.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Statistics for one topic.
    pub fn get(&self, topic: &str) -> Option<&TopicStats> {
        self.topics.get(topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TopicStats)> {
        self.topics.iter()
    }

    /// Messages received across all topics.
    pub fn total_messages(&self) -> u64 {
        self.topics.values().map(|t| t.count).sum()
    }

    /// Flow outputs classified across all topics.
    pub fn total_flow_outputs(&self) -> u64 {
        self.topics.values().map(|t| t.flow_outputs).sum()
    }

    /// Classification failures across all topics.
    pub fn total_classification_errors(&self) -> u64 {
        self.topics.values().map(|t| t.classification_errors).sum()
    }
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing `StatsSnapshot` instances.
#[derive(Debug, Default)]
pub struct StatsSnapshotBuilder {
    timestamp_ms: Option<i64>,
    topics: BTreeMap<String, TopicStats>,
}

impl StatsSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a specific timestamp (milliseconds since Unix epoch).
    pub fn timestamp_ms(mut self, ts: i64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    /// Add statistics for a topic, replacing any previous entry for it.
    pub fn topic(mut self, stats: TopicStats) -> Self {
        self.topics.insert(stats.topic.clone(), stats);
        self
    }

    pub fn build(self) -> StatsSnapshot {
        StatsSnapshot {
            version: SchemaVersion::CURRENT,
            timestamp_ms: self.timestamp_ms.unwrap_or_else(now_ms),
            topics: self.topics,
        }
    }
}
