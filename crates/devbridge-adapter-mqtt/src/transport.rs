//! `rumqttc` transport.

use crate::broker_url::parse_broker_url;
use devbridge_core::{MessageHandler, Transport, TransportError};
use devbridge_proto::{topic_match, Message, QoS};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type HandlerMap = Arc<Mutex<BTreeMap<String, Vec<MessageHandler>>>>;

/// How long `stop` waits for the DISCONNECT packet to go out.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

struct EventLoopTask {
    handle: JoinHandle<()>,
    /// Closed when the task ends.
    done: mpsc::Receiver<()>,
}

/// Configuration for the MQTT transport.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    /// MQTT broker URL (e.g., <tcp://localhost:1883>)
    pub broker: String,
    /// Client ID for MQTT connection
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Capacity of the outgoing request queue
    pub capacity: usize,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: "devbridge".to_string(),
            keep_alive: Duration::from_secs(30),
            capacity: 100,
        }
    }
}

/// MQTT client implementing [`Transport`].
pub struct MqttTransport {
    client: AsyncClient,
    client_id: String,
    runtime: Handle,
    eventloop: Mutex<Option<EventLoop>>,
    task: Mutex<Option<EventLoopTask>>,
    handlers: HandlerMap,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create a transport whose event loop will run on `runtime`.
    ///
    /// No connection is attempted until [`Transport::start`].
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(config: &MqttTransportConfig, runtime: Handle) -> Result<Self, MqttTransportError> {
        let (host, port) = parse_broker_url(&config.broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(mqtt_options, config.capacity);

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            runtime,
            eventloop: Mutex::new(Some(eventloop)),
            task: Mutex::new(None),
            handlers: Arc::new(Mutex::new(BTreeMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_started(&self) -> Result<(), TransportError> {
        if lock(&self.task).is_some() {
            Ok(())
        } else {
            Err(TransportError::NotStarted(self.client_id.clone()))
        }
    }
}

impl Transport for MqttTransport {
    fn start(&self) -> Result<(), TransportError> {
        let eventloop = lock(&self.eventloop)
            .take()
            .ok_or_else(|| TransportError::AlreadyStarted(self.client_id.clone()))?;

        tracing::info!(client_id = %self.client_id, "Starting MQTT transport");
        let (done_tx, done) = mpsc::channel();
        let client = self.client.clone();
        let handlers = self.handlers.clone();
        let connected = self.connected.clone();
        let handle = self.runtime.spawn(async move {
            run_eventloop(eventloop, client, handlers, connected).await;
            drop(done_tx);
        });
        *lock(&self.task) = Some(EventLoopTask { handle, done });
        Ok(())
    }

    fn stop(&self) {
        let Some(task) = lock(&self.task).take() else {
            return;
        };
        if self.connected.load(Ordering::SeqCst) {
            match self.client.try_disconnect() {
                Ok(()) => match task.done.recv_timeout(DISCONNECT_TIMEOUT) {
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::warn!(client_id = %self.client_id, "MQTT disconnect timed out");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
                },
                Err(err) => tracing::warn!(error = %err, "MQTT disconnect failed"),
            }
        }
        task.handle.abort();
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(client_id = %self.client_id, "MQTT transport stopped");
    }

    fn publish(&self, message: Message) -> Result<(), TransportError> {
        self.ensure_started()?;
        tracing::trace!(topic = %message.topic, "Publishing");
        self.client
            .try_publish(
                message.topic,
                to_mqtt_qos(message.qos),
                message.retained,
                message.payload.into_bytes(),
            )
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn subscribe(&self, handler: MessageHandler, topics: &[&str]) -> Result<(), TransportError> {
        self.ensure_started()?;
        for topic in topics {
            lock(&self.handlers)
                .entry((*topic).to_string())
                .or_default()
                .push(handler.clone());

            tracing::debug!(topic = %topic, "Subscribing to MQTT topic");
            self.client
                .try_subscribe(*topic, rumqttc::QoS::AtLeastOnce)
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        }
        Ok(())
    }

    fn unsubscribe(&self, topics: &[&str]) -> Result<(), TransportError> {
        self.ensure_started()?;
        for topic in topics {
            lock(&self.handlers).remove(*topic);
            self.client
                .try_unsubscribe(*topic)
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        }
        Ok(())
    }
}

/// Runs until the DISCONNECT packet requested by `stop` has been sent.
async fn run_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    handlers: HandlerMap,
    connected: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = to_message(&publish);
                tracing::debug!(
                    topic = %message.topic,
                    payload_len = message.payload.len(),
                    "Received MQTT message"
                );
                dispatch(&handlers, &message);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                connected.store(true, Ordering::SeqCst);
                resubscribe(&client, &handlers);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("Disconnected from MQTT broker");
                connected.store(false, Ordering::SeqCst);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                tracing::error!(error = %e, "MQTT error");
                // Try to reconnect after a delay
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Subscriptions do not survive a reconnect with a clean session.
///
/// Runs on the event loop task, the only reader of the request queue, so it
/// must never wait for queue space.
fn resubscribe(client: &AsyncClient, handlers: &HandlerMap) {
    let patterns: Vec<String> = lock(handlers).keys().cloned().collect();
    for pattern in patterns {
        if let Err(err) = client.try_subscribe(&pattern, rumqttc::QoS::AtLeastOnce) {
            tracing::warn!(error = %err, topic = %pattern, "Resubscribe failed");
        }
    }
}

/// Invoke every handler whose pattern matches the message topic.
fn dispatch(handlers: &HandlerMap, message: &Message) {
    let matching: Vec<MessageHandler> = lock(handlers)
        .iter()
        .filter(|(pattern, _)| topic_match(pattern, &message.topic))
        .flat_map(|(_, handlers)| handlers.iter().cloned())
        .collect();
    for handler in matching {
        handler(message.clone());
    }
}

fn to_message(publish: &Publish) -> Message {
    Message {
        topic: publish.topic.clone(),
        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
        qos: from_mqtt_qos(publish.qos),
        retained: publish.retain,
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors from constructing the MQTT transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttTransportError {
    /// Invalid MQTT URL
    #[error("invalid MQTT URL: {0}")]
    InvalidUrl(String),
}
