//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bring up the metrics exporter, the broker session and one worker per topic
//! - Turn a fatal startup failure into a distinct exit status
//! - Drive the ordered teardown once shutdown fires
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, but units already running are
//!   stopped through the shutdown token before returning
//! - The exporter is bound before the broker is contacted, so a bad bind
//!   address never leaves a half-open MQTT session behind
//! - Every wait is bounded; a stuck unit is aborted, never awaited forever
//! - A broker session lost for good after startup still tears down in
//!   order, then exits with the connect status

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::broker::{BrokerClient, BrokerError, Topic, TopicSet};
use crate::config::{AppConfig, ConfigError};
use crate::http::MetricsServer;
use crate::lifecycle::tracker::{WaitReport, WorkerSet, WorkerSetError};
use crate::lifecycle::Shutdown;
use crate::observability::TopicCounters;
use crate::resilience::timeouts::with_deadline;
use crate::routing::{MessageRouter, RouterError};
use crate::worker::{TopicWorker, WorkerSettings};

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONNECT: u8 = 1;
pub const EXIT_SUBSCRIBE: u8 = 2;
pub const EXIT_METRICS_BIND: u8 = 3;
pub const EXIT_CONFIG: u8 = 4;
pub const EXIT_SIGNALS: u8 = 5;
/// Internal software error (sysexits `EX_SOFTWARE`).
pub const EXIT_INTERNAL: u8 = 70;

/// Fatal errors that end the process early.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind metrics endpoint on {address}: {source}")]
    MetricsBind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("broker connection failed: {0}")]
    Connect(#[source] BrokerError),

    #[error("failed to subscribe to topic '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] io::Error),

    #[error("routing setup failed: {0}")]
    Routing(#[from] RouterError),

    #[error("worker set error: {0}")]
    WorkerSet(#[from] WorkerSetError),
}

impl StartupError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::MetricsBind { .. } => EXIT_METRICS_BIND,
            Self::Connect(_) => EXIT_CONNECT,
            Self::Subscribe { .. } => EXIT_SUBSCRIBE,
            Self::Signals(_) => EXIT_SIGNALS,
            Self::Routing(_) | Self::WorkerSet(_) => EXIT_INTERNAL,
        }
    }
}

/// What a clean run ended with.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Final counter value per configured topic.
    pub counts: BTreeMap<String, u64>,
    /// How the tracked units finished.
    pub report: WaitReport,
}

/// Owns the startup and teardown sequence.
pub struct Orchestrator {
    config: AppConfig,
    topics: TopicSet,
    counters: TopicCounters,
    shutdown: Shutdown,
}

impl Orchestrator {
    pub fn new(config: AppConfig, shutdown: Shutdown) -> Self {
        let topics = config.topic_set();
        let counters = TopicCounters::new(&topics);
        Self {
            config,
            topics,
            counters,
            shutdown,
        }
    }

    pub fn counters(&self) -> &TopicCounters {
        &self.counters
    }

    /// Bind the configured metrics address and run.
    pub async fn run(self, broker: Arc<dyn BrokerClient>) -> Result<RunSummary, StartupError> {
        let address = self.config.metrics.bind_address.clone();
        let listener = TcpListener::bind(&address).await.map_err(|source| {
            tracing::error!(address = %address, error = %source, "Failed to bind metrics endpoint");
            StartupError::MetricsBind { address, source }
        })?;
        self.run_with_listener(listener, broker).await
    }

    /// Run with an already bound metrics listener.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        broker: Arc<dyn BrokerClient>,
    ) -> Result<RunSummary, StartupError> {
        let Self {
            config,
            topics,
            counters,
            shutdown,
        } = self;

        let mut units = WorkerSet::new(topics.len() + 1);

        let exporter = MetricsServer::new(&config.metrics, counters.clone());
        let exporter_shutdown = shutdown.clone();
        units.spawn("metrics-exporter", async move {
            if let Err(e) = exporter.run(listener, exporter_shutdown).await {
                tracing::error!(error = %e, "Metrics server failed");
            }
        })?;

        let mut router = MessageRouter::new();
        let mut inboxes = Vec::with_capacity(topics.len());
        for topic in &topics {
            inboxes.push((topic.clone(), router.register(topic)?));
        }
        let router = Arc::new(router);

        tracing::info!(
            broker = %config.broker.url,
            topics = topics.len(),
            "Connecting to broker"
        );
        let connected = with_deadline(
            "connect",
            config.broker.connect_timeout(),
            broker.connect(router),
        )
        .await;
        if let Err(e) = connected {
            tracing::error!(error = %e, "Failed to connect to broker");
            shutdown.trigger();
            units.wait(config.shutdown.drain_timeout()).await;
            return Err(StartupError::Connect(e));
        }

        let settings = WorkerSettings {
            qos: config.broker.qos,
            subscribe_timeout: config.shutdown.subscribe_timeout(),
            unsubscribe_timeout: config.shutdown.unsubscribe_timeout(),
        };
        let (ready_tx, mut ready_rx) = mpsc::channel(topics.len().max(1));
        for (topic, inbox) in inboxes {
            let worker = TopicWorker::new(
                topic.clone(),
                broker.clone(),
                counters.clone(),
                inbox,
                shutdown.clone(),
                settings,
            );
            let ready = ready_tx.clone();
            units.spawn(format!("worker:{topic}"), async move {
                let report = worker.run(ready).await;
                tracing::debug!(
                    topic = %report.topic,
                    counted = report.counted,
                    drained = report.drained,
                    unsubscribed = report.unsubscribed,
                    "Worker finished"
                );
            })?;
        }
        drop(ready_tx);

        if let Err(e) = await_subscriptions(&mut ready_rx, topics.len()).await {
            shutdown.trigger();
            units.wait(config.shutdown.drain_timeout()).await;
            disconnect(broker.as_ref(), &config).await;
            return Err(e);
        }
        units.ensure_complete()?;
        tracing::info!(units = units.len(), "All workers listening");

        shutdown.wait().await;
        tracing::info!("Shutdown started, waiting for workers");

        let report = units.wait(config.shutdown.drain_timeout()).await;
        if !report.all_completed() {
            tracing::warn!(
                failed = ?report.failed,
                aborted = ?report.aborted,
                "Not every unit stopped cleanly"
            );
        }
        disconnect(broker.as_ref(), &config).await;

        let counts = counters.snapshot();
        tracing::info!(counts = ?counts, total = counters.total(), "Final message counts");

        if let Some(e) = broker.failure() {
            tracing::error!(error = %e, "Broker session ended abnormally");
            return Err(StartupError::Connect(e));
        }
        Ok(RunSummary { counts, report })
    }
}

/// Collect one subscription outcome per topic, failing on the first error.
async fn await_subscriptions(
    ready: &mut mpsc::Receiver<(Topic, Result<(), BrokerError>)>,
    expected: usize,
) -> Result<(), StartupError> {
    for _ in 0..expected {
        match ready.recv().await {
            Some((_, Ok(()))) => {}
            Some((topic, Err(source))) => {
                return Err(StartupError::Subscribe {
                    topic: topic.to_string(),
                    source,
                });
            }
            // A worker died before reporting.
            None => {
                return Err(StartupError::Subscribe {
                    topic: String::from("<unknown>"),
                    source: BrokerError::AckLost(String::from("worker exited before subscribing")),
                });
            }
        }
    }
    Ok(())
}

/// Best-effort broker disconnect.
async fn disconnect(broker: &dyn BrokerClient, config: &AppConfig) {
    let grace = config.shutdown.disconnect_grace();
    // Outer bound covers a client that ignores its own grace.
    match with_deadline("disconnect", grace * 2, broker.disconnect(grace)).await {
        Ok(()) => tracing::info!("Disconnected from broker"),
        Err(e) => tracing::warn!(error = %e, "Broker disconnect failed"),
    }
}
