//! Delivery routing from the broker client to topic workers.
//!
//! # Responsibilities
//! - Hold one registration (inbox sender) per subscribed topic
//! - Resolve the owner of each delivered message
//! - Forward the message to that owner only
//!
//! # Design Decisions
//! - Registrations happen before the router is shared; immutable afterwards
//! - Exact topic match first, then wildcard filters in registration order
//! - Inboxes hold a single message so a slow worker slows the broker client
//!   down instead of queueing here
//! - Explicit outcome rather than silent drop

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::broker::{Message, Topic};
use crate::routing::matcher::{FilterError, TopicFilter};

/// Capacity of each worker inbox.
pub const INBOX_CAPACITY: usize = 1;

/// Errors raised while registering a worker.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("topic '{0}' already has a registered worker")]
    Duplicate(String),

    #[error("cannot route topic '{topic}': {source}")]
    InvalidFilter {
        topic: String,
        #[source]
        source: FilterError,
    },
}

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the worker owning this topic.
    Delivered(Topic),
    /// No registration matches the message topic.
    Unrouted,
    /// The owning worker has stopped reading (shutdown in progress).
    Closed(Topic),
}

#[derive(Debug)]
struct Route {
    owner: Topic,
    tx: mpsc::Sender<Message>,
}

/// Routes every broker delivery to exactly one topic worker.
#[derive(Debug, Default)]
pub struct MessageRouter {
    exact: HashMap<String, Route>,
    filters: Vec<(TopicFilter, Route)>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the worker owning `topic` and return its inbox.
    pub fn register(&mut self, topic: &Topic) -> Result<mpsc::Receiver<Message>, RouterError> {
        if self.is_registered(topic) {
            return Err(RouterError::Duplicate(topic.to_string()));
        }

        let filter = TopicFilter::parse(topic.as_str()).map_err(|source| {
            RouterError::InvalidFilter {
                topic: topic.to_string(),
                source,
            }
        })?;

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let route = Route {
            owner: topic.clone(),
            tx,
        };

        if topic.is_wildcard() {
            self.filters.push((filter, route));
        } else {
            self.exact.insert(topic.to_string(), route);
        }

        tracing::debug!(topic = %topic, "Registered topic route");
        Ok(rx)
    }

    fn is_registered(&self, topic: &Topic) -> bool {
        self.exact.contains_key(topic.as_str())
            || self.filters.iter().any(|(_, r)| &r.owner == topic)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.exact.len() + self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn route_for(&self, topic: &str) -> Option<&Route> {
        self.exact.get(topic).or_else(|| {
            self.filters
                .iter()
                .find(|(filter, _)| filter.matches(topic))
                .map(|(_, route)| route)
        })
    }

    /// The subscribed topic that owns deliveries on `topic`.
    pub fn resolve(&self, topic: &str) -> Option<&Topic> {
        self.route_for(topic).map(|r| &r.owner)
    }

    /// Forward `message` to its owner, waiting while the owner's inbox is full.
    pub async fn dispatch(&self, message: Message) -> DispatchOutcome {
        let Some(route) = self.route_for(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Dropping message for unsubscribed topic");
            return DispatchOutcome::Unrouted;
        };

        match route.tx.send(message).await {
            Ok(()) => DispatchOutcome::Delivered(route.owner.clone()),
            Err(mpsc::error::SendError(message)) => {
                tracing::debug!(
                    topic = %message.topic,
                    owner = %route.owner,
                    "Worker stopped reading, dropping message"
                );
                DispatchOutcome::Closed(route.owner.clone())
            }
        }
    }
}
