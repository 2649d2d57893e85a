//! Configuration loading from disk and the command line.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::broker::{QosLevel, TopicSet};
use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied on the command line. `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub broker_url: Option<String>,
    pub client_id: Option<String>,
    pub qos: Option<QosLevel>,
    /// Comma separated topic list.
    pub topics: Option<String>,
    pub metrics_address: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Apply the overrides on top of `config`.
    pub fn apply(self, config: &mut AppConfig) {
        if let Some(url) = self.broker_url {
            config.broker.url = url;
        }
        if let Some(client_id) = self.client_id {
            config.broker.client_id = client_id;
        }
        if let Some(qos) = self.qos {
            config.broker.qos = qos;
        }
        if let Some(topics) = self.topics {
            config.topics = TopicSet::parse(&topics)
                .iter()
                .map(ToString::to_string)
                .collect();
        }
        if let Some(addr) = self.metrics_address {
            config.metrics.bind_address = addr;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

/// Parse a configuration from TOML text without validating it.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load configuration from an optional TOML file, apply CLI overrides and
/// validate the result.
pub fn load_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => AppConfig::default(),
    };

    overrides.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let config = parse_config(
            r#"
            topics = ["sensors/+/temp", "alerts"]

            [broker]
            url = "mqtt://broker.local:1884"
            qos = 1

            [shutdown]
            unsubscribe_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.url, "mqtt://broker.local:1884");
        assert_eq!(config.broker.qos, QosLevel::AtLeastOnce);
        assert_eq!(config.broker.client_id, "mqtt-hackathon-monitoring");
        assert_eq!(config.topic_set().len(), 2);
        assert_eq!(config.shutdown.unsubscribe_timeout_ms, 500);
        assert_eq!(config.shutdown.disconnect_grace_ms, 250);
        assert_eq!(config.metrics.path, "/metrics");
    }

    #[test]
    fn test_rejects_invalid_qos() {
        let err = parse_config("[broker]\nqos = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides_win() {
        let overrides = ConfigOverrides {
            topics: Some("a, b,,a".to_string()),
            qos: Some(QosLevel::ExactlyOnce),
            client_id: Some("garden-monitor".to_string()),
            ..Default::default()
        };
        let config = load_config(None, overrides).unwrap();
        assert_eq!(config.topics, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.broker.qos, QosLevel::ExactlyOnce);
        assert_eq!(config.broker.client_id, "garden-monitor");
    }

    #[test]
    fn test_load_reports_validation_errors() {
        let overrides = ConfigOverrides {
            broker_url: Some("http://nowhere".to_string()),
            ..Default::default()
        };
        let err = load_config(None, overrides).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("unsupported scheme"));
    }
}
