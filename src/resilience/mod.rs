//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call into the broker:
//!     → timeouts.rs (every subscribe/unsubscribe/connect has a deadline)
//!
//! Connection lost after startup:
//!     → backoff.rs (delay before the event loop polls again)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A hung broker call must never stall shutdown
//! - Startup failures are not retried; only an established session reconnects

pub mod backoff;
pub mod timeouts;
