//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broker::{QosLevel, TopicSet};

/// Root configuration for the topic counter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Broker connection settings.
    pub broker: BrokerConfig,

    /// Topics to subscribe to, fixed for the process lifetime.
    pub topics: Vec<String>,

    /// Metrics endpoint settings.
    pub metrics: MetricsConfig,

    /// Shutdown deadlines.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topics: vec![
                "home/garden/fountain".to_string(),
                "home/garden/sprinkler".to_string(),
            ],
            metrics: MetricsConfig::default(),
            shutdown: ShutdownConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// The deduplicated topic set.
    pub fn topic_set(&self) -> TopicSet {
        TopicSet::from_names(&self.topics)
    }
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker address including scheme and port (e.g., "tcp://127.0.0.1:1883").
    pub url: String,

    /// MQTT client identifier. Empty means generate one.
    pub client_id: String,

    /// Quality of service level used for every subscription.
    pub qos: QosLevel,

    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,

    /// Start with a clean session.
    pub clean_session: bool,

    /// Time allowed for the broker to acknowledge the connection.
    pub connect_timeout_ms: u64,

    /// Capacity of the client request channel.
    pub event_capacity: usize,

    /// Base delay for reconnect backoff in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Maximum delay for reconnect backoff in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "tcp://127.0.0.1:1883".to_string(),
            client_id: "mqtt-hackathon-monitoring".to_string(),
            qos: QosLevel::AtMostOnce,
            keep_alive_secs: 30,
            clean_session: true,
            connect_timeout_ms: 5_000,
            event_capacity: 64,
            reconnect_base_delay_ms: 100,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The configured client id, or a generated one when left empty.
    pub fn effective_client_id(&self) -> String {
        if !self.client_id.is_empty() {
            return self.client_id.clone();
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("mqtt-topic-counter-{}", &id[..8])
    }
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics endpoint bind address.
    pub bind_address: String,

    /// Path serving the Prometheus text format.
    pub path: String,

    /// Time in-flight scrapes get to finish once shutdown starts.
    pub shutdown_grace_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            path: "/metrics".to_string(),
            shutdown_grace_ms: 5_000,
            request_timeout_secs: 10,
        }
    }
}

impl MetricsConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Deadlines applied to broker calls and to the shutdown barrier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Deadline for a subscription to be acknowledged.
    pub subscribe_timeout_ms: u64,

    /// Deadline for an unsubscribe during shutdown.
    pub unsubscribe_timeout_ms: u64,

    /// Grace period handed to the broker disconnect.
    pub disconnect_grace_ms: u64,

    /// Deadline for all units to finish once shutdown starts.
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout_ms: 5_000,
            unsubscribe_timeout_ms: 2_000,
            disconnect_grace_ms: 250,
            drain_timeout_ms: 10_000,
        }
    }
}

impl ShutdownConfig {
    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    pub fn unsubscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
