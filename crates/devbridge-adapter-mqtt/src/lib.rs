//! # MQTT Adapter
//!
//! [`devbridge_core::Transport`] implementation on top of `rumqttc`.
//!
//! The client's event loop runs as a task on a caller-provided tokio runtime.
//! Inbound publications are dispatched to every handler whose pattern matches
//! the topic, using the same matching rule as the broker.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker_url;
pub mod transport;

pub use broker_url::parse_broker_url;
pub use transport::{MqttTransport, MqttTransportConfig, MqttTransportError};
