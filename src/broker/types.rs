//! Broker-facing value types and error definitions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A subscribed topic (an MQTT topic filter).
///
/// Cheap to clone; the string is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Arc<str>);

impl Topic {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the topic contains MQTT wildcard levels.
    pub fn is_wildcard(&self) -> bool {
        self.0.split('/').any(|level| level == "+" || level == "#")
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

/// The fixed, ordered set of topics the process subscribes to.
///
/// Entries are trimmed, blanks are skipped and duplicates collapse to their
/// first occurrence, so every topic maps to exactly one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet {
    topics: Vec<Topic>,
}

impl TopicSet {
    /// Parse a comma separated list such as `"a/b, c/+/d"`.
    pub fn parse(list: &str) -> Self {
        Self::from_names(list.split(','))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut topics: Vec<Topic> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if topics.iter().any(|t| t.as_str() == name) {
                tracing::warn!(topic = name, "Ignoring duplicate topic");
                continue;
            }
            topics.push(Topic::new(name));
        }
        Self { topics }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Topic> {
        self.topics.iter()
    }
}

impl<'a> IntoIterator for &'a TopicSet {
    type Item = &'a Topic;
    type IntoIter = std::slice::Iter<'a, Topic>;

    fn into_iter(self) -> Self::IntoIter {
        self.topics.iter()
    }
}

/// A single broker delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Concrete topic the broker published on.
    pub topic: String,
    /// Payload decoded as UTF-8 (lossy).
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn from_bytes(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// MQTT quality of service level requested per subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    /// At most once.
    #[default]
    AtMostOnce,
    /// At least once.
    AtLeastOnce,
    /// Exactly once.
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Errors that can occur while talking to the broker.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The connection could not be established.
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    /// The broker refused the subscription.
    #[error("broker rejected subscription to '{0}'")]
    SubscriptionRejected(String),

    /// Client-side failure issuing a request.
    #[error("broker request failed: {0}")]
    Request(String),

    /// The request was issued but its acknowledgement never arrived.
    #[error("no acknowledgement from broker for '{0}'")]
    AckLost(String),

    /// An operation ran past its deadline.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The client has not been connected.
    #[error("broker client is not connected")]
    NotConnected,
}
