//! Broker client subsystem.
//!
//! # Data Flow
//! ```text
//! connect(router)
//!     → mqtt.rs spawns the event loop driver
//!     → CONNACK resolves connect()
//!
//! Inbound PUBLISH
//!     → driver → MessageRouter::dispatch → owning TopicWorker
//!
//! subscribe/unsubscribe
//!     → request queued on the client
//!     → driver pairs the outgoing packet id with the pending request
//!     → SUBACK/UNSUBACK resolves the call
//! ```
//!
//! # Design Decisions
//! - The core only sees the `BrokerClient` trait; tests supply their own
//! - Delivery goes through per-topic router registrations, never a shared
//!   default handler
//! - Callers bound every call with a deadline (see resilience::timeouts)
//! - A session the broker refuses to resume fires shutdown and is reported
//!   through `failure`

pub mod mqtt;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::routing::MessageRouter;

pub use mqtt::MqttBroker;
pub use types::{BrokerError, Message, QosLevel, Topic, TopicSet};

/// Capability the core needs from a publish/subscribe broker.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Connect and start delivering inbound messages to `router`.
    async fn connect(&self, router: Arc<MessageRouter>) -> Result<(), BrokerError>;

    /// Subscribe to `topic`, resolving once the broker acknowledged it.
    async fn subscribe(&self, topic: &Topic, qos: QosLevel) -> Result<(), BrokerError>;

    /// Unsubscribe from `topic`.
    async fn unsubscribe(&self, topic: &Topic) -> Result<(), BrokerError>;

    /// Disconnect, giving in-flight work up to `grace` to settle.
    async fn disconnect(&self, grace: Duration) -> Result<(), BrokerError>;

    /// The error that ended an established session, if one did.
    fn failure(&self) -> Option<BrokerError> {
        None
    }
}
