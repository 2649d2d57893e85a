//! MQTT topic counter.
//!
//! Subscribes to a fixed set of MQTT topics and exposes the number of
//! messages seen on each as a Prometheus counter.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌──────────────────────────────────────────────────┐
//!                   │                 TOPIC COUNTER                     │
//!                   │                                                   │
//!   MQTT broker     │  ┌──────────┐    ┌──────────┐    ┌─────────────┐ │
//!   ────────────────┼─▶│  broker  │───▶│ routing  │───▶│ worker (xN) │ │
//!                   │  │event loop│    │per-topic │    │  counting   │ │
//!                   │  └──────────┘    └──────────┘    └──────┬──────┘ │
//!                   │                                         ▼        │
//!   Scraper         │  ┌──────────┐                    ┌─────────────┐ │
//!   ◀───────────────┼──│   http   │◀───────────────────│  counters   │ │
//!                   │  │ /metrics │                    │             │ │
//!                   │  └──────────┘                    └─────────────┘ │
//!                   │                                                   │
//!                   │  config · lifecycle · observability · resilience  │
//!                   └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use mqtt_topic_counter::broker::{MqttBroker, QosLevel};
use mqtt_topic_counter::config::{load_config, ConfigOverrides};
use mqtt_topic_counter::lifecycle::startup::{EXIT_CONFIG, EXIT_CONNECT, EXIT_OK};
use mqtt_topic_counter::lifecycle::{Orchestrator, Shutdown, SignalListener, StartupError};
use mqtt_topic_counter::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "mqtt-topic-counter")]
#[command(about = "Counts MQTT messages per topic and exports them to Prometheus", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker URL, e.g. tcp://127.0.0.1:1883
    #[arg(long)]
    broker: Option<String>,

    /// MQTT client identifier (empty generates one)
    #[arg(long, alias = "clientID")]
    client_id: Option<String>,

    /// Subscription QoS level (0, 1 or 2)
    #[arg(long, value_parser = parse_qos)]
    qos: Option<QosLevel>,

    /// Comma separated list of topics
    #[arg(long)]
    topics: Option<String>,

    /// Address the metrics endpoint binds to
    #[arg(long)]
    metrics_address: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            broker_url: self.broker.clone(),
            client_id: self.client_id.clone(),
            qos: self.qos,
            topics: self.topics.clone(),
            metrics_address: self.metrics_address.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

fn parse_qos(raw: &str) -> Result<QosLevel, String> {
    let level: u8 = raw.parse().map_err(|_| format!("'{raw}' is not a number"))?;
    QosLevel::try_from(level)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the config, so report this directly.
            eprintln!("mqtt-topic-counter: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    logging::init(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.broker.url,
        topics = ?config.topics,
        metrics_address = %config.metrics.bind_address,
        "mqtt-topic-counter starting"
    );

    let shutdown = Shutdown::new();
    let signals = match SignalListener::register() {
        Ok(signals) => signals,
        Err(e) => return fail(StartupError::Signals(e)),
    };
    let signal_task = signals.spawn(shutdown.clone());

    let broker = match MqttBroker::new(&config.broker, shutdown.clone()) {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            tracing::error!(error = %e, "Invalid broker settings");
            return ExitCode::from(EXIT_CONNECT);
        }
    };

    let result = Orchestrator::new(config, shutdown).run(broker).await;
    signal_task.abort();

    match result {
        Ok(summary) => {
            tracing::info!(
                completed = summary.report.completed,
                expected = summary.report.expected,
                "Shutdown complete"
            );
            ExitCode::from(EXIT_OK)
        }
        Err(e) => fail(e),
    }
}

fn fail(error: StartupError) -> ExitCode {
    tracing::error!(error = %error, exit_code = error.exit_code(), "Startup failed");
    ExitCode::from(error.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "mqtt-topic-counter",
            "--broker",
            "mqtt://broker:1884",
            "--clientID",
            "counter-1",
            "--qos",
            "1",
            "--topics",
            "a,b",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.broker_url.as_deref(), Some("mqtt://broker:1884"));
        assert_eq!(overrides.client_id.as_deref(), Some("counter-1"));
        assert_eq!(overrides.qos, Some(QosLevel::AtLeastOnce));
        assert_eq!(overrides.topics.as_deref(), Some("a,b"));
        assert!(overrides.metrics_address.is_none());
    }

    #[test]
    fn test_qos_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["mqtt-topic-counter", "--qos", "3"]).is_err());
        assert!(Cli::try_parse_from(["mqtt-topic-counter", "--qos", "x"]).is_err());
    }
}
