//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (per-topic message counters)
//!
//! Consumers:
//!     → Log aggregation (stderr)
//!     → Metrics endpoint (Prometheus scrape, see http/server.rs)
//! ```
//!
//! # Design Decisions
//! - Structured fields (topic, error, signal) on every event
//! - Metrics are cheap (atomic increments)
//! - The counter registry is an owned value, not a global recorder

pub mod logging;
pub mod metrics;

pub use metrics::TopicCounters;
