//! HTTP surface (metrics scrape endpoint).
//!
//! # Data Flow
//! ```text
//! Scraper GET /metrics
//!     → server.rs (Axum router, trace + timeout layers)
//!     → TopicCounters::render (Prometheus text format)
//! ```

pub mod server;

pub use server::MetricsServer;
