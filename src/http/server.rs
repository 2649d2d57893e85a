//! Metrics HTTP server.
//!
//! # Responsibilities
//! - Create the Axum Router serving the scrape endpoint
//! - Wire up middleware (tracing, request timeout)
//! - Serve until shutdown, then give in-flight scrapes a bounded grace period

use std::future::IntoFuture;
use std::time::Duration;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::time;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::MetricsConfig;
use crate::lifecycle::Shutdown;
use crate::observability::TopicCounters;

/// Content type of the Prometheus text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// HTTP server exposing the per-topic counters.
pub struct MetricsServer {
    router: Router,
    grace: Duration,
}

impl MetricsServer {
    /// Create a new metrics server with the given configuration.
    pub fn new(config: &MetricsConfig, counters: TopicCounters) -> Self {
        Self {
            router: Self::build_router(config, counters),
            grace: config.shutdown_grace(),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &MetricsConfig, counters: TopicCounters) -> Router {
        Router::new()
            .route(&config.path, get(render_metrics))
            .with_state(counters)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// Once shutdown starts no new connections are accepted; in-flight
    /// requests get up to the grace period, after which the server is
    /// dropped.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Metrics server starting");

        let signal = shutdown.clone();
        let serve = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { signal.wait().await })
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                tracing::info!("Metrics server stopped");
                return result;
            }
            _ = shutdown.wait() => {
                tracing::warn!("Shutting down metrics server");
            }
        }

        match time::timeout(self.grace, serve).await {
            Ok(result) => {
                tracing::info!("Metrics server stopped");
                result
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "In-flight scrapes did not finish within grace period"
                );
                Ok(())
            }
        }
    }
}

/// Scrape handler.
async fn render_metrics(State(counters): State<TopicCounters>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        counters.render(),
    )
}
