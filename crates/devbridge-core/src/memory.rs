//! In-process broker and transport.
//!
//! [`MemoryBroker`] routes publications synchronously to every
//! [`MemoryTransport`] with a matching subscription and keeps a journal of
//! publish/subscribe traffic, which makes it the transport of choice for tests.

use crate::transport::{MessageHandler, Transport, TransportError};
use devbridge_proto::{topic_match, Message};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An entry of the broker journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A client published a message
    Publish {
        /// Client id of the publisher
        origin: String,
        /// Published message
        message: Message,
    },
    /// A client subscribed to a pattern
    Subscribe {
        /// Client id
        client: String,
        /// Pattern
        topic: String,
    },
    /// A client unsubscribed from a pattern
    Unsubscribe {
        /// Client id
        client: String,
        /// Pattern
        topic: String,
    },
    /// A client stopped
    Stop {
        /// Client id
        client: String,
    },
}

impl fmt::Display for BrokerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish { origin, message } => {
                write!(f, "{origin} -> {}: {message}", message.topic)
            }
            Self::Subscribe { client, topic } => write!(f, "Subscribe -- {client}: {topic}"),
            Self::Unsubscribe { client, topic } => write!(f, "Unsubscribe -- {client}: {topic}"),
            Self::Stop { client } => write!(f, "stop: {client}"),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    subscriptions: BTreeMap<String, Vec<Arc<ClientShared>>>,
    journal: Vec<BrokerEvent>,
}

/// Shared in-process broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client connected to this broker.
    #[must_use]
    pub fn client(&self, id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            shared: Arc::new(ClientShared {
                id: id.into(),
                state: Mutex::new(ClientState::default()),
            }),
            broker: self.clone(),
        }
    }

    /// Drain the journal, rendered one line per entry.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().journal)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Message> {
        self.lock()
            .journal
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Publish { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, origin: &str, message: &Message) {
        let targets = {
            let mut state = self.lock();
            state.journal.push(BrokerEvent::Publish {
                origin: origin.to_string(),
                message: message.clone(),
            });

            let mut targets: Vec<Arc<ClientShared>> = Vec::new();
            for (pattern, clients) in &state.subscriptions {
                if !topic_match(pattern, &message.topic) {
                    continue;
                }
                for client in clients {
                    if !targets.iter().any(|known| Arc::ptr_eq(known, client)) {
                        targets.push(client.clone());
                    }
                }
            }
            targets
        };

        for client in targets {
            client.receive(message);
        }
    }

    fn subscribe(&self, client: &Arc<ClientShared>, topic: &str) {
        let mut state = self.lock();
        state.journal.push(BrokerEvent::Subscribe {
            client: client.id.clone(),
            topic: topic.to_string(),
        });
        let clients = state.subscriptions.entry(topic.to_string()).or_default();
        if !clients.iter().any(|known| Arc::ptr_eq(known, client)) {
            clients.push(client.clone());
        }
    }

    fn unsubscribe(&self, client: &Arc<ClientShared>, topic: &str) {
        let mut state = self.lock();
        state.journal.push(BrokerEvent::Unsubscribe {
            client: client.id.clone(),
            topic: topic.to_string(),
        });
        if let Some(clients) = state.subscriptions.get_mut(topic) {
            clients.retain(|known| !Arc::ptr_eq(known, client));
        }
    }

    fn record(&self, event: BrokerEvent) {
        self.lock().journal.push(event);
    }
}

#[derive(Default)]
struct ClientState {
    started: bool,
    handlers: BTreeMap<String, Vec<MessageHandler>>,
}

struct ClientShared {
    id: String,
    state: Mutex<ClientState>,
}

impl ClientShared {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receive(&self, message: &Message) {
        let handlers: Vec<MessageHandler> = self
            .lock()
            .handlers
            .iter()
            .filter(|(pattern, _)| topic_match(pattern, &message.topic))
            .flat_map(|(_, handlers)| handlers.iter().cloned())
            .collect();
        for handler in handlers {
            handler(message.clone());
        }
    }
}

/// A client of a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<ClientShared>,
    broker: MemoryBroker,
}

impl MemoryTransport {
    /// Client id, used as publication origin in the journal.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    fn ensure_started(&self) -> Result<(), TransportError> {
        if self.shared.lock().started {
            Ok(())
        } else {
            Err(TransportError::NotStarted(self.shared.id.clone()))
        }
    }
}

impl Transport for MemoryTransport {
    fn start(&self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.started {
            return Err(TransportError::AlreadyStarted(self.shared.id.clone()));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if !state.started {
                tracing::warn!(client = %self.shared.id, "Stopping a client that is not started");
                return;
            }
            state.started = false;
        }
        self.broker.record(BrokerEvent::Stop {
            client: self.shared.id.clone(),
        });
    }

    fn publish(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_started()?;
        self.broker.publish(&self.shared.id, &message);
        Ok(())
    }

    fn subscribe(&self, handler: MessageHandler, topics: &[&str]) -> Result<(), TransportError> {
        self.ensure_started()?;
        for topic in topics {
            self.broker.subscribe(&self.shared, topic);
            self.shared
                .lock()
                .handlers
                .entry((*topic).to_string())
                .or_default()
                .push(handler.clone());
        }
        Ok(())
    }

    fn unsubscribe(&self, topics: &[&str]) -> Result<(), TransportError> {
        self.ensure_started()?;
        for topic in topics {
            self.broker.unsubscribe(&self.shared, topic);
            self.shared.lock().handlers.remove(*topic);
        }
        Ok(())
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}
