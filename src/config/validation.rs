//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check topic filters are well formed MQTT filters
//! - Validate value ranges (timeouts > 0, addresses parse)

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::AppConfig;
use crate::routing::matcher::TopicFilter;

/// Schemes the broker client can speak.
const SUPPORTED_SCHEMES: &[&str] = &["tcp", "mqtt"];

/// Default MQTT port when the URL omits one.
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Minimum keep-alive accepted by the client library.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no topics configured")]
    NoTopics,

    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("invalid broker url '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },

    #[error("keep_alive_secs must be at least 5, got {0}")]
    KeepAliveTooShort(u64),

    #[error("invalid metrics bind address '{0}'")]
    InvalidMetricsAddress(String),

    #[error("metrics path '{0}' must start with '/'")]
    InvalidMetricsPath(String),

    #[error("broker.event_capacity {capacity} is too small for {topics} topics (need at least {needed})")]
    EventCapacityTooSmall {
        capacity: usize,
        topics: usize,
        needed: usize,
    },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

/// Host and port of the broker, extracted from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Parse a broker URL such as `tcp://127.0.0.1:1883`.
pub fn parse_broker_url(raw: &str) -> Result<BrokerEndpoint, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidBrokerUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(invalid(format!(
            "unsupported scheme '{}', expected one of {:?}",
            url.scheme(),
            SUPPORTED_SCHEMES
        )));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
    })
}

/// Validate the whole configuration, collecting every problem.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let topics = config.topic_set();
    if topics.is_empty() {
        errors.push(ValidationError::NoTopics);
    }
    for topic in &topics {
        if let Err(e) = TopicFilter::parse(topic.as_str()) {
            errors.push(ValidationError::InvalidTopic {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }
    }

    if let Err(e) = parse_broker_url(&config.broker.url) {
        errors.push(e);
    }
    if config.broker.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
        errors.push(ValidationError::KeepAliveTooShort(config.broker.keep_alive_secs));
    }
    // Every topic queues a subscribe at startup and an unsubscribe at shutdown.
    let needed = (topics.len() * 2).max(1);
    if config.broker.event_capacity < needed {
        errors.push(ValidationError::EventCapacityTooSmall {
            capacity: config.broker.event_capacity,
            topics: topics.len(),
            needed,
        });
    }
    if config.broker.connect_timeout_ms == 0 {
        errors.push(ValidationError::ZeroValue("broker.connect_timeout_ms"));
    }

    if config.metrics.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.metrics.bind_address.clone(),
        ));
    }
    if !config.metrics.path.starts_with('/') {
        errors.push(ValidationError::InvalidMetricsPath(config.metrics.path.clone()));
    }
    if config.metrics.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue("metrics.request_timeout_secs"));
    }

    let deadlines = [
        (config.shutdown.subscribe_timeout_ms, "shutdown.subscribe_timeout_ms"),
        (config.shutdown.unsubscribe_timeout_ms, "shutdown.unsubscribe_timeout_ms"),
        (config.shutdown.drain_timeout_ms, "shutdown.drain_timeout_ms"),
        (config.shutdown.disconnect_grace_ms, "shutdown.disconnect_grace_ms"),
        (config.metrics.shutdown_grace_ms, "metrics.shutdown_grace_ms"),
    ];
    for (value, name) in deadlines {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&AppConfig::default()), Ok(()));
    }

    #[test]
    fn test_parse_broker_url() {
        let endpoint = parse_broker_url("tcp://127.0.0.1:1883").unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 1883);

        let endpoint = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(endpoint.port, DEFAULT_MQTT_PORT);

        assert!(parse_broker_url("http://broker.local").is_err());
        assert!(parse_broker_url("not a url").is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = AppConfig::default();
        config.topics = vec![" ".to_string(), String::new()];
        config.broker.keep_alive_secs = 1;
        config.metrics.path = "metrics".to_string();
        config.shutdown.unsubscribe_timeout_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::NoTopics));
        assert!(errors.contains(&ValidationError::KeepAliveTooShort(1)));
        assert!(errors.contains(&ValidationError::InvalidMetricsPath("metrics".to_string())));
        assert!(errors.contains(&ValidationError::ZeroValue("shutdown.unsubscribe_timeout_ms")));
    }

    #[test]
    fn test_zero_grace_periods_are_rejected() {
        let mut config = AppConfig::default();
        config.shutdown.disconnect_grace_ms = 0;
        config.metrics.shutdown_grace_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ZeroValue("shutdown.disconnect_grace_ms"),
                ValidationError::ZeroValue("metrics.shutdown_grace_ms"),
            ]
        );
    }

    #[test]
    fn test_event_capacity_must_cover_topics() {
        let mut config = AppConfig::default();
        config.broker.event_capacity = 3;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::EventCapacityTooSmall {
                capacity: 3,
                topics: 2,
                needed: 4,
            }]
        );
    }

    #[test]
    fn test_rejects_malformed_topic_filter() {
        let mut config = AppConfig::default();
        config.topics = vec!["home/#/garden".to_string()];
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidTopic { .. }));
    }
}
