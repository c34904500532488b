//! Per-topic statistics maintained by the output monitor.

/// Counters and timestamps for one topic.
///
/// Counts only ever grow during a monitoring session. `first_seen_ms` and
/// `last_seen_ms` are local receive times in milliseconds since the Unix
/// epoch.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopicStats {
    /// Topic name.
    pub topic: String,

    /// Number of messages received on the topic.
    pub count: u64,

    /// Number of those messages classified as flow outputs.
    pub flow_outputs: u64,

    /// Number of messages the classifier failed on.
    pub classification_errors: u64,

    /// When the first message was received.
    pub first_seen_ms: i64,

    /// When the most recent message was received.
    pub last_seen_ms: i64,
}

impl TopicStats {
    /// Create empty statistics for a topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Create a builder for topic statistics.
    pub fn builder(topic: impl Into<String>) -> TopicStatsBuilder {
        TopicStatsBuilder::new(topic)
    }

    /// Account for one received message.
    ///
    /// Initializes `first_seen_ms` on the first message.
    pub fn observe(&mut self, received_ms: i64) {
        if self.count == 0 {
            self.first_seen_ms = received_ms;
        }
        self.count += 1;
        self.last_seen_ms = self.last_seen_ms.max(received_ms);
    }

    /// Messages per second between the first and last message. `count`
    /// messages cover `count - 1` intervals.
    ///
    /// `None` until messages span a measurable interval.
    pub fn rate(&self) -> Option<f64> {
        let span_ms = self.last_seen_ms - self.first_seen_ms;
        if self.count < 2 || span_ms <= 0 {
            return None;
        }
        Some((self.count - 1) as f64 * 1000.0 / span_ms as f64)
    }

    /// Share of messages classified as flow outputs, in `0.0..=1.0`.
    pub fn flow_ratio(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.flow_outputs as f64 / self.count as f64
        }
    }
}

/// Builder for `TopicStats`.
#[derive(Debug)]
pub struct TopicStatsBuilder {
    stats: TopicStats,
}

impl TopicStatsBuilder {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            stats: TopicStats::new(topic),
        }
    }

    pub fn count(mut self, count: u64) -> Self {
        self.stats.count = count;
        self
    }

    pub fn flow_outputs(mut self, flow_outputs: u64) -> Self {
        self.stats.flow_outputs = flow_outputs;
        self
    }

    pub fn classification_errors(mut self, errors: u64) -> Self {
        self.stats.classification_errors = errors;
        self
    }

    /// Set first and last receive times.
    pub fn seen(mut self, first_ms: i64, last_ms: i64) -> Self {
        self.stats.first_seen_ms = first_ms;
        self.stats.last_seen_ms = last_ms;
        self
    }

    pub fn build(self) -> TopicStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_sets_first_seen_once() {
        let mut stats = TopicStats::new("orders");
        stats.observe(1_000);
        stats.observe(1_500);
        stats.observe(2_000);

        assert_eq!(stats.count, 3);
        assert_eq!(stats.first_seen_ms, 1_000);
        assert_eq!(stats.last_seen_ms, 2_000);
    }

    #[test]
    fn last_seen_never_moves_backwards() {
        let mut stats = TopicStats::new("orders");
        stats.observe(2_000);
        stats.observe(1_000);

        assert_eq!(stats.last_seen_ms, 2_000);
    }

    #[test]
    fn rate_needs_a_measurable_span() {
        let mut stats = TopicStats::new("orders");
        assert_eq!(stats.rate(), None);

        stats.observe(1_000);
        assert_eq!(stats.rate(), None);

        stats.observe(1_000);
        assert_eq!(stats.rate(), None);

        stats.observe(3_000);
        assert_eq!(stats.rate(), Some(1.0));
    }

    #[test]
    fn two_messages_a_second_apart_is_one_per_second() {
        let mut stats = TopicStats::new("orders");
        stats.observe(10_000);
        stats.observe(11_000);

        assert_eq!(stats.rate(), Some(1.0));
    }

    #[test]
    fn flow_ratio_of_empty_topic_is_zero() {
        assert_eq!(TopicStats::new("t").flow_ratio(), 0.0);

        let stats = TopicStats::builder("t").count(4).flow_outputs(1).build();
        assert_eq!(stats.flow_ratio(), 0.25);
    }

    #[test]
    fn builder_sets_all_fields() {
        let stats = TopicStats::builder("t")
            .count(10)
            .flow_outputs(4)
            .classification_errors(2)
            .seen(100, 200)
            .build();

        assert_eq!(stats.topic, "t");
        assert_eq!(stats.count, 10);
        assert_eq!(stats.flow_outputs, 4);
        assert_eq!(stats.classification_errors, 2);
        assert_eq!((stats.first_seen_ms, stats.last_seen_ms), (100, 200));
    }
}
