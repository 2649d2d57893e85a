//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mqtt_topic_counter::broker::{BrokerClient, BrokerError, Message, QosLevel, Topic};
use mqtt_topic_counter::config::AppConfig;
use mqtt_topic_counter::routing::{DispatchOutcome, MessageRouter};

/// Scripted in-memory broker.
#[derive(Default)]
pub struct MockBroker {
    fail_connect: bool,
    reject: HashSet<String>,
    hang_subscribe: bool,
    hang_unsubscribe: bool,
    hang_disconnect: bool,
    failure: Mutex<Option<BrokerError>>,
    router: Mutex<Option<Arc<MessageRouter>>>,
    subscribed: Mutex<Vec<(String, QosLevel)>>,
    unsubscribed: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every connection attempt.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Reject the subscription for `topic`.
    pub fn rejecting(mut self, topic: &str) -> Self {
        self.reject.insert(topic.to_string());
        self
    }

    /// Never acknowledge a subscribe.
    pub fn hanging_subscribe(mut self) -> Self {
        self.hang_subscribe = true;
        self
    }

    /// Never answer an unsubscribe.
    pub fn hanging_unsubscribe(mut self) -> Self {
        self.hang_unsubscribe = true;
        self
    }

    /// Ignore the disconnect grace and never return.
    pub fn hanging_disconnect(mut self) -> Self {
        self.hang_disconnect = true;
        self
    }

    /// End the established session the way a broker refusing to resume it
    /// would. The caller fires shutdown, as the event loop does.
    pub fn end_session(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(BrokerError::Connect(reason.to_string()));
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<_> = self
            .subscribed
            .lock()
            .unwrap()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn subscribed_qos(&self) -> Vec<QosLevel> {
        self.subscribed.lock().unwrap().iter().map(|(_, qos)| *qos).collect()
    }

    pub fn unsubscriptions(&self) -> Vec<String> {
        let mut topics = self.unsubscribed.lock().unwrap().clone();
        topics.sort();
        topics
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Wait until `count` subscriptions were accepted.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.subscribed.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscriptions did not arrive in time");
    }

    /// Deliver a publish as the broker event loop would.
    pub async fn deliver(&self, topic: &str, payload: &str) -> DispatchOutcome {
        let router = self
            .router
            .lock()
            .unwrap()
            .clone()
            .expect("deliver called before connect");
        router.dispatch(Message::new(topic, payload)).await
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn connect(&self, router: Arc<MessageRouter>) -> Result<(), BrokerError> {
        if self.fail_connect {
            return Err(BrokerError::Connect("connection refused".to_string()));
        }
        *self.router.lock().unwrap() = Some(router);
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic, qos: QosLevel) -> Result<(), BrokerError> {
        if self.hang_subscribe {
            std::future::pending::<()>().await;
        }
        if self.reject.contains(topic.as_str()) {
            return Err(BrokerError::SubscriptionRejected(topic.to_string()));
        }
        self.subscribed
            .lock()
            .unwrap()
            .push((topic.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), BrokerError> {
        if self.hang_unsubscribe {
            std::future::pending::<()>().await;
        }
        self.unsubscribed.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) -> Result<(), BrokerError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.hang_disconnect {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn failure(&self) -> Option<BrokerError> {
        self.failure.lock().unwrap().clone()
    }
}

/// Configuration with short deadlines and an ephemeral metrics port.
pub fn test_config(topics: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.topics = topics.iter().map(|t| t.to_string()).collect();
    config.metrics.bind_address = "127.0.0.1:0".to_string();
    config.metrics.shutdown_grace_ms = 200;
    config.shutdown.subscribe_timeout_ms = 1_000;
    config.shutdown.unsubscribe_timeout_ms = 200;
    config.shutdown.disconnect_grace_ms = 50;
    config.shutdown.drain_timeout_ms = 3_000;
    config
}
