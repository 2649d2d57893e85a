//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind exporter → Connect broker → Spawn workers → Await subscriptions
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Workers drain + unsubscribe → Exporter stops → Disconnect
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Tracking (tracker.rs):
//!     Fixed-size WorkerSet (topics + exporter) → bounded wait
//! ```
//!
//! # Design Decisions
//! - Ordered startup: exporter first, then broker, then workers
//! - Shutdown has a deadline: stragglers are aborted after it

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod tracker;

pub use shutdown::Shutdown;
pub use signals::SignalListener;
pub use startup::{Orchestrator, RunSummary, StartupError};
pub use tracker::{WaitReport, WorkerSet, WorkerSetError};
