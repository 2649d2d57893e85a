//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Own the per-topic message counters
//! - Render them in the Prometheus text format for scraping
//!
//! # Metrics
//! - `mqtt_message_counter` (counter): messages received, labelled by `topic`
//!
//! # Design Decisions
//! - No global recorder: one `TopicCounters` is built at startup and handed
//!   to every worker and to the exporter
//! - Every configured topic is registered up front so it scrapes as 0
//! - Increments are atomic; scrapes see an eventually consistent snapshot

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::{Counter, Key, KeyName, Label, Level, Metadata, Recorder, SharedString};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::broker::{Topic, TopicSet};

/// Name of the exported counter.
pub const MESSAGE_COUNTER: &str = "mqtt_message_counter";

/// Label carrying the subscribed topic.
pub const TOPIC_LABEL: &str = "topic";

struct TopicCounter {
    /// Local tally, readable without parsing the exposition output.
    value: AtomicU64,
    /// Handle into the Prometheus registry.
    exported: Counter,
}

/// Per-topic message counters shared by workers and the exporter.
#[derive(Clone)]
pub struct TopicCounters {
    counters: Arc<HashMap<Topic, TopicCounter>>,
    handle: PrometheusHandle,
}

impl TopicCounters {
    /// Create a registry with one zeroed counter per topic.
    pub fn new(topics: &TopicSet) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        recorder.describe_counter(
            KeyName::from(MESSAGE_COUNTER),
            None,
            SharedString::from("counts all messages per topic"),
        );

        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        let counters = topics
            .iter()
            .map(|topic| {
                let key = Key::from_parts(
                    MESSAGE_COUNTER,
                    vec![Label::new(TOPIC_LABEL, topic.to_string())],
                );
                let exported = recorder.register_counter(&key, &metadata);
                // Materialize the series so it is scraped before the first message.
                exported.increment(0);
                (
                    topic.clone(),
                    TopicCounter {
                        value: AtomicU64::new(0),
                        exported,
                    },
                )
            })
            .collect();

        Self {
            counters: Arc::new(counters),
            handle: recorder.handle(),
        }
    }

    /// Count one message for `topic`. Returns the new total, or `None` if the
    /// topic was never registered.
    pub fn increment(&self, topic: &Topic) -> Option<u64> {
        let counter = self.counters.get(topic)?;
        counter.exported.increment(1);
        Some(counter.value.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Current count for `topic`.
    pub fn get(&self, topic: &Topic) -> Option<u64> {
        self.counters
            .get(topic)
            .map(|c| c.value.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of every counter, ordered by topic.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|(topic, c)| (topic.to_string(), c.value.load(Ordering::Relaxed)))
            .collect()
    }

    /// Total messages counted across all topics.
    pub fn total(&self) -> u64 {
        self.counters
            .values()
            .map(|c| c.value.load(Ordering::Relaxed))
            .sum()
    }

    /// Render the Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for TopicCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicCounters")
            .field("counts", &self.snapshot())
            .finish()
    }
}
