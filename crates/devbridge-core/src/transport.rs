//! Transport capability consumed by the driver.

use devbridge_proto::Message;
use std::sync::Arc;

/// Callback invoked for every delivered message whose topic matches one of the
/// patterns it was subscribed with.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// A publish/subscribe client.
///
/// Implementations deliver a message to a handler when the handler's pattern
/// matches the topic according to [`devbridge_proto::topic_match`].
pub trait Transport: Send + Sync {
    /// Connect and begin delivering messages.
    ///
    /// # Errors
    ///
    /// Returns error if the client is already started or cannot connect.
    fn start(&self) -> Result<(), TransportError>;

    /// Disconnect. Handlers stay registered.
    fn stop(&self);

    /// Publish a message.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not started or the request is rejected.
    fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Register `handler` for every pattern in `topics`.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not started or the request is rejected.
    fn subscribe(&self, handler: MessageHandler, topics: &[&str]) -> Result<(), TransportError>;

    /// Drop every handler registered for the given patterns.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not started or the request is rejected.
    fn unsubscribe(&self, topics: &[&str]) -> Result<(), TransportError>;
}

/// Errors reported by transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Client used before `start`
    #[error("{0}: client not started")]
    NotStarted(String),
    /// `start` called twice
    #[error("{0}: client already started")]
    AlreadyStarted(String),
    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Subscribe or unsubscribe failed
    #[error("subscription error: {0}")]
    Subscribe(String),
}
