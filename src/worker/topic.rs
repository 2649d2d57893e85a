//! Per-topic subscription worker.
//!
//! # State Transitions
//! ```text
//! Subscribing → Listening:     broker acknowledged the subscription
//! Subscribing → Done:          subscription failed (fatal, reported upstream)
//! Listening → Unsubscribing:   shutdown triggered, or the router went away
//! Unsubscribing → Done:        inbox drained, unsubscribe attempted
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::broker::{BrokerClient, BrokerError, Message, QosLevel, Topic};
use crate::lifecycle::Shutdown;
use crate::observability::TopicCounters;
use crate::resilience::timeouts::with_deadline;

/// Lifecycle state of a topic worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Subscribing,
    Listening,
    Unsubscribing,
    Done,
}

/// Knobs shared by every topic worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub qos: QosLevel,
    pub subscribe_timeout: Duration,
    pub unsubscribe_timeout: Duration,
}

/// Channel on which workers report their subscription outcome.
pub type ReadySender = mpsc::Sender<(Topic, Result<(), BrokerError>)>;

/// What a worker did over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub topic: Topic,
    /// Messages this worker counted.
    pub counted: u64,
    /// Messages counted while draining the inbox at shutdown.
    pub drained: u64,
    /// Whether the broker confirmed the unsubscribe.
    pub unsubscribed: bool,
}

/// Owns one topic's subscribe → consume → unsubscribe lifecycle.
pub struct TopicWorker {
    topic: Topic,
    broker: Arc<dyn BrokerClient>,
    counters: TopicCounters,
    inbox: mpsc::Receiver<Message>,
    shutdown: Shutdown,
    settings: WorkerSettings,
    state: WorkerState,
    counted: u64,
}

impl TopicWorker {
    pub fn new(
        topic: Topic,
        broker: Arc<dyn BrokerClient>,
        counters: TopicCounters,
        inbox: mpsc::Receiver<Message>,
        shutdown: Shutdown,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            topic,
            broker,
            counters,
            inbox,
            shutdown,
            settings,
            state: WorkerState::Subscribing,
            counted: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn transition(&mut self, next: WorkerState) {
        tracing::debug!(topic = %self.topic, from = ?self.state, to = ?next, "Worker state change");
        self.state = next;
    }

    /// Run the whole lifecycle. The subscription outcome is sent on `ready`
    /// before the worker starts listening.
    pub async fn run(mut self, ready: ReadySender) -> WorkerReport {
        let subscribed = self.subscribe().await;
        let failed = subscribed.is_err();
        // The orchestrator may have given up waiting; nothing to do then.
        let _ = ready.send((self.topic.clone(), subscribed)).await;
        drop(ready);

        if failed {
            self.transition(WorkerState::Done);
            return self.report(0, false);
        }

        self.listen().await;
        let (drained, unsubscribed) = self.unsubscribe().await;
        self.transition(WorkerState::Done);
        self.report(drained, unsubscribed)
    }

    fn report(&self, drained: u64, unsubscribed: bool) -> WorkerReport {
        WorkerReport {
            topic: self.topic.clone(),
            counted: self.counted,
            drained,
            unsubscribed,
        }
    }

    async fn subscribe(&mut self) -> Result<(), BrokerError> {
        let result = with_deadline(
            "subscribe",
            self.settings.subscribe_timeout,
            self.broker.subscribe(&self.topic, self.settings.qos),
        )
        .await;

        match &result {
            Ok(()) => {
                tracing::info!(
                    topic = %self.topic,
                    qos = u8::from(self.settings.qos),
                    "Successfully subscribed to topic"
                );
                self.transition(WorkerState::Listening);
            }
            Err(e) => {
                tracing::error!(topic = %self.topic, error = %e, "Failed to subscribe to topic");
            }
        }
        result
    }

    fn count(&mut self, message: &Message) {
        self.counters.increment(&self.topic);
        self.counted += 1;
        tracing::debug!(
            topic = %self.topic,
            message_topic = %message.topic,
            payload = %message.payload,
            "Received message"
        );
    }

    async fn listen(&mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    tracing::warn!(
                        topic = %self.topic,
                        "Unsubscribing from topic because of quit signal"
                    );
                    break;
                }
                message = self.inbox.recv() => match message {
                    Some(message) => self.count(&message),
                    None => {
                        tracing::warn!(
                            topic = %self.topic,
                            "Message router closed, stopping worker"
                        );
                        break;
                    }
                },
            }
        }
        self.transition(WorkerState::Unsubscribing);
    }

    /// Close the inbox, count what was already buffered, then unsubscribe.
    /// Failures are logged; shutdown carries on regardless.
    async fn unsubscribe(&mut self) -> (u64, bool) {
        self.inbox.close();
        let mut drained = 0;
        while let Some(message) = self.inbox.recv().await {
            self.count(&message);
            drained += 1;
        }

        let result = with_deadline(
            "unsubscribe",
            self.settings.unsubscribe_timeout,
            self.broker.unsubscribe(&self.topic),
        )
        .await;

        match result {
            Ok(()) => {
                tracing::info!(topic = %self.topic, drained, "Unsubscribed from topic");
                (drained, true)
            }
            Err(e) => {
                tracing::warn!(
                    topic = %self.topic,
                    error = %e,
                    "Unsubscribe failed, continuing shutdown"
                );
                (drained, false)
            }
        }
    }
}
