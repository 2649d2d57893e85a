//! MQTT topic counter library.
//!
//! Subscribes to a fixed topic set, counts messages per topic and serves
//! the counts in the Prometheus text format.

// Core subsystems
pub mod broker;
pub mod config;
pub mod http;
pub mod routing;
pub mod worker;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use broker::{BrokerClient, MqttBroker};
pub use config::AppConfig;
pub use http::MetricsServer;
pub use lifecycle::{Orchestrator, Shutdown, StartupError};
pub use observability::TopicCounters;
