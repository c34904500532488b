//! Per-topic statistics owned by the output monitor.

use std::collections::BTreeMap;
use std::sync::Arc;

use brokerlink_types::{StatsSnapshot, TopicStats};
use parking_lot::{Mutex, RwLock};

/// How the classifier judged a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Flow,
    Ignored,
    Failed,
}

/// Thread-safe map of topic name to statistics.
///
/// Entries are created on the first record of a topic and only removed by
/// [`reset`](StatsRegistry::reset).
#[derive(Debug, Default)]
pub(crate) struct StatsRegistry {
    topics: RwLock<BTreeMap<String, Arc<Mutex<TopicStats>>>>,
}

impl StatsRegistry {
    fn get_or_create(&self, topic: &str) -> Arc<Mutex<TopicStats>> {
        {
            let topics = self.topics.read();
            if let Some(stats) = topics.get(topic) {
                return stats.clone();
            }
        }

        // Another record may have created it between the two locks.
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TopicStats::new(topic))))
            .clone()
    }

    /// Account for one record in a single step.
    pub(crate) fn record(&self, topic: &str, received_ms: i64, outcome: Outcome) {
        let entry = self.get_or_create(topic);
        let mut stats = entry.lock();
        stats.observe(received_ms);
        match outcome {
            Outcome::Flow => stats.flow_outputs += 1,
            Outcome::Failed => stats.classification_errors += 1,
            Outcome::Ignored => {}
        }
    }

    pub(crate) fn get(&self, topic: &str) -> Option<TopicStats> {
        self.topics.read().get(topic).map(|stats| stats.lock().clone())
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::new();
        snapshot.topics = self
            .topics
            .read()
            .iter()
            .map(|(topic, stats)| (topic.clone(), stats.lock().clone()))
            .collect();
        snapshot
    }

    pub(crate) fn reset(&self) {
        self.topics.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_creates_the_entry() {
        let registry = StatsRegistry::default();
        assert!(registry.get("orders").is_none());

        registry.record("orders", 1_000, Outcome::Ignored);

        let stats = registry.get("orders").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.first_seen_ms, 1_000);
        assert_eq!(stats.last_seen_ms, 1_000);
    }

    #[test]
    fn outcomes_update_their_counters() {
        let registry = StatsRegistry::default();

        registry.record("orders", 1_000, Outcome::Flow);
        registry.record("orders", 1_500, Outcome::Ignored);
        registry.record("orders", 2_000, Outcome::Failed);

        let stats = registry.get("orders").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.flow_outputs, 1);
        assert_eq!(stats.classification_errors, 1);
        assert_eq!(stats.first_seen_ms, 1_000);
        assert_eq!(stats.last_seen_ms, 2_000);
    }

    #[test]
    fn snapshot_is_detached() {
        let registry = StatsRegistry::default();
        registry.record("a", 1, Outcome::Ignored);
        registry.record("b", 1, Outcome::Flow);

        let snapshot = registry.snapshot();
        registry.record("a", 2, Outcome::Ignored);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a").unwrap().count, 1);
        assert_eq!(registry.get("a").unwrap().count, 2);
    }

    #[test]
    fn concurrent_records_are_all_counted() {
        let registry = Arc::new(StatsRegistry::default());

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        registry.record("shared", i * 1_000 + n, Outcome::Ignored);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.get("shared").unwrap().count, 1_000);
    }

    #[test]
    fn reset_clears_everything() {
        let registry = StatsRegistry::default();
        registry.record("a", 1, Outcome::Flow);

        registry.reset();

        assert!(registry.snapshot().is_empty());
    }
}
