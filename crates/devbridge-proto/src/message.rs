//! Messages exchanged with the transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// MQTT quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible
    AtLeastOnce,
    /// Assured single delivery
    ExactlyOnce,
}

impl QoS {
    /// Numeric level as used on the wire.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// A single publication as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Concrete topic (no wildcards)
    pub topic: String,
    /// UTF-8 payload
    pub payload: String,
    /// Delivery level
    pub qos: QoS,
    /// Whether the broker keeps this as last-known state
    pub retained: bool,
}

impl Message {
    /// Create a message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: QoS, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retained,
        }
    }

    /// Retained QoS 1 message, the form used for metadata and values.
    #[must_use]
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(topic, payload, QoS::AtLeastOnce, true)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] (QoS {}", self.payload, self.qos.level())?;
        if self.retained {
            f.write_str(", retained")?;
        }
        f.write_str(")")
    }
}
