//! Topic workers.
//!
//! # Data Flow
//! ```text
//! MessageRouter inbox (one per topic)
//!     → topic.rs (TopicWorker)
//!     → TopicCounters::increment(topic)
//!
//! Shutdown triggered:
//!     → close inbox → drain → unsubscribe (bounded) → Done
//! ```
//!
//! # Design Decisions
//! - One worker per topic for the whole process lifetime
//! - Workers observe the shutdown signal, they never own it
//! - Subscription failure is fatal; unsubscribe failure is not

pub mod topic;

pub use topic::{ReadySender, TopicWorker, WorkerReport, WorkerSettings, WorkerState};
