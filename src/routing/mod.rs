//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Broker delivery (topic, payload)
//!     → router.rs (owner lookup)
//!     → matcher.rs (wildcard filter evaluation)
//!     → owning worker's inbox, or explicit Unrouted
//!
//! Route registration (at startup):
//!     TopicSet
//!     → one inbox per topic
//!     → Freeze as immutable router shared with the broker client
//! ```
//!
//! # Design Decisions
//! - Routes registered at startup, immutable at runtime
//! - Deterministic: the same topic always reaches the same worker
//! - Exactly one owner per delivery; workers never compete for messages

pub mod matcher;
pub mod router;

pub use matcher::TopicFilter;
pub use router::{DispatchOutcome, MessageRouter, RouterError};
