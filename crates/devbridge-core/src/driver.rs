//! The driver: moves data between a [`Model`] and a [`Transport`].
//!
//! All model and device state is owned by a single dispatch thread. Everything
//! else reaches it through a [`DriverHandle`]: transport deliveries, device
//! events and arbitrary callbacks are queued and executed in order on that
//! thread. The callback queue is bounded; submitting to a full queue blocks
//! the submitter until the loop catches up. Work submitted from the dispatch
//! thread itself never blocks: once the queue is full it is deferred and runs
//! after everything queued ahead of it. A callback that waits for another
//! callback to complete on the same loop deadlocks.

use crate::admission::{self, AdmissionError};
use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::model::{Control, DeviceHandle, ExternalDevice, Model};
use crate::registry::DeviceRegistry;
use crate::transport::{MessageHandler, Transport};
use devbridge_proto::topics::{
    self, ParsedTopic, CONTROL_MAX_PATTERN, CONTROL_TYPE_PATTERN, CONTROL_VALUE_PATTERN,
    DEVICE_TITLE_PATTERN,
};
use devbridge_proto::{Message, QoS};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Capacity of the callback queue.
pub const EVENT_QUEUE_LEN: usize = 100;

/// Unit of work executed on the dispatch thread.
pub type Callback = Box<dyn FnOnce(&mut DriverCore) + Send>;

type TopicHandler = fn(&mut DriverCore, Message);

/// Callbacks the dispatch thread submitted while the queue was full.
#[derive(Default)]
struct Overflow {
    owner: Mutex<Option<ThreadId>>,
    backlog: Mutex<VecDeque<Callback>>,
}

impl Overflow {
    fn claim(&self) {
        *lock(&self.owner) = Some(thread::current().id());
    }

    fn release(&self) {
        *lock(&self.owner) = None;
    }

    fn owned_by_current_thread(&self) -> bool {
        *lock(&self.owner) == Some(thread::current().id())
    }

    fn take(&self) -> VecDeque<Callback> {
        std::mem::take(&mut *lock(&self.backlog))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable entry point into a driver's dispatch loop.
///
/// Models and devices receive one through `observe`; every method queues work
/// and returns without waiting for it, except [`DriverHandle::call_and_wait`].
#[derive(Clone)]
pub struct DriverHandle {
    events: mpsc::Sender<Callback>,
    polls: mpsc::Sender<()>,
    overflow: Arc<Overflow>,
}

impl DriverHandle {
    /// Queue `callback` to run on the dispatch thread.
    ///
    /// Blocks while the queue is full, unless called from the dispatch thread.
    pub fn call<F>(&self, callback: F)
    where
        F: FnOnce(&mut DriverCore) + Send + 'static,
    {
        let callback: Callback = Box::new(callback);
        if self.overflow.owned_by_current_thread() {
            self.defer(callback);
            return;
        }
        let result = match self.events.try_send(callback) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(callback)) => {
                tracing::debug!("Driver queue full, waiting for space");
                futures::executor::block_on(tokio::task::unconstrained(
                    self.events.send(callback),
                ))
                .map_err(|_| ())
            }
            Err(TrySendError::Closed(_)) => Err(()),
        };
        if result.is_err() {
            tracing::warn!("Driver queue closed, dropping callback");
        }
    }

    /// Queue `callback` and block until it has run, returning its result.
    ///
    /// Must not be called from the dispatch thread itself, and only returns
    /// once the driver is running.
    ///
    /// # Errors
    ///
    /// Returns error if the driver is dropped before the callback runs.
    pub fn call_and_wait<F, R>(&self, callback: F) -> Result<R, DriverError>
    where
        F: FnOnce(&mut DriverCore) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.call(move |core| {
            let _ = tx.send(callback(core));
        });
        futures::executor::block_on(tokio::task::unconstrained(rx)).map_err(|_| DriverError::Stopped)
    }

    /// Queue from the dispatch thread, which must not wait on its own queue.
    fn defer(&self, callback: Callback) {
        let mut backlog = lock(&self.overflow.backlog);
        if !backlog.is_empty() {
            backlog.push_back(callback);
            return;
        }
        match self.events.try_send(callback) {
            Ok(()) => {}
            Err(TrySendError::Full(callback)) => {
                tracing::debug!("Driver queue full, deferring callback");
                backlog.push_back(callback);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Driver queue closed, dropping callback");
            }
        }
    }

    /// Request a model poll on the dispatch thread.
    ///
    /// Requests made while one is already pending are merged.
    pub fn poll(&self) {
        if let Err(TrySendError::Closed(())) = self.polls.try_send(()) {
            tracing::warn!("Driver poll channel closed");
        }
    }

    /// Announce a new device. Replaces any device with the same name.
    pub fn on_new_device(&self, device: DeviceHandle) {
        self.call(move |core| core.register_device(device));
    }

    /// Announce a control of a registered device.
    pub fn on_new_control(&self, device: impl Into<String>, control: Control) {
        let device = device.into();
        self.call(move |core| core.new_control(&device, &control));
    }

    /// Announce a new value of a control.
    pub fn on_value(&self, device: impl Into<String>, control: impl Into<String>, value: impl Into<String>) {
        let (device, control, value) = (device.into(), control.into(), value.into());
        self.call(move |core| core.value_changed(&device, &control, value));
    }

    /// Wrap a topic handler so that it runs on the dispatch thread.
    fn wrap(&self, handler: TopicHandler) -> MessageHandler {
        let handle = self.clone();
        Arc::new(move |message: Message| {
            handle.call(move |core| handler(core, message));
        })
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("closed", &self.events.is_closed())
            .finish()
    }
}

/// Driver state owned by the dispatch thread.
///
/// Callbacks receive it mutably; it is never reachable from anywhere else.
pub struct DriverCore {
    config: DriverConfig,
    model: Box<dyn Model>,
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    handle: DriverHandle,
    subscriptions: HashSet<String>,
}

impl DriverCore {
    /// Registered devices.
    #[must_use]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Configuration the loop was started with.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Handle to this driver's queue.
    #[must_use]
    pub fn handle(&self) -> &DriverHandle {
        &self.handle
    }

    fn start(&mut self) -> Result<(), DriverError> {
        self.transport.start()?;
        self.model.start().map_err(DriverError::ModelStart)?;

        if self.config.accepts_external_devices {
            self.subscribe(DEVICE_TITLE_PATTERN, Self::handle_device_title);
            self.subscribe(CONTROL_VALUE_PATTERN, Self::handle_external_value);
            self.subscribe(CONTROL_TYPE_PATTERN, Self::handle_external_type);
            self.subscribe(CONTROL_MAX_PATTERN, Self::handle_external_max);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.model.stop();
        self.transport.stop();
    }

    fn poll_model(&mut self) {
        tracing::trace!("Polling model");
        self.model.poll();
    }

    fn publish(&self, message: Message) {
        let topic = message.topic.clone();
        if let Err(err) = self.transport.publish(message) {
            tracing::warn!(error = %err, topic = %topic, "Failed to publish");
        }
    }

    fn publish_meta(&self, topic: String, payload: impl Into<String>) {
        self.publish(Message::retained(topic, payload));
    }

    /// Subscribe once per pattern; later calls for the same pattern are no-ops.
    fn subscribe(&mut self, pattern: &str, handler: TopicHandler) {
        if !self.subscriptions.insert(pattern.to_string()) {
            return;
        }
        tracing::debug!(topic = %pattern, "Subscribing");
        let handler = self.handle.wrap(handler);
        if let Err(err) = self.transport.subscribe(handler, &[pattern]) {
            tracing::warn!(error = %err, topic = %pattern, "Failed to subscribe");
            self.subscriptions.remove(pattern);
        }
    }

    fn register_device(&mut self, mut device: DeviceHandle) {
        device.observe(self.handle.clone());
        let name = device.name().to_string();
        let title = device.title().to_string();
        tracing::debug!(device = %name, external = device.is_external(), "New device");
        if self.registry.register(device) {
            self.publish_meta(topics::device_name_topic(&name), title);
        }
    }

    fn new_control(&mut self, device: &str, control: &Control) {
        if !self.registry.contains(device) {
            tracing::warn!(device = %device, control = %control.name, "Control for unknown device");
            return;
        }
        let name = control.name.as_str();

        self.publish_meta(topics::type_topic(device, name), control.control_type.as_str());
        if let Some(order) = self.registry.control_first_seen(device, name) {
            self.publish_meta(topics::order_topic(device, name), order.to_string());
        }
        if let Some(max) = topics::format_max(control.max) {
            self.publish_meta(topics::max_topic(device, name), max);
        }
        self.publish(Message::retained(
            topics::value_topic(device, name),
            control.value.as_str(),
        ));

        if !control.read_only {
            self.subscribe(&topics::command_topic(device, name), Self::handle_command);
        }
    }

    fn value_changed(&mut self, device: &str, control: &str, value: String) {
        match self.registry.get(device) {
            Some(handle) if handle.is_external() => self.publish(Message::new(
                topics::command_topic(device, control),
                value,
                QoS::AtLeastOnce,
                false,
            )),
            Some(_) => self.publish(Message::retained(topics::value_topic(device, control), value)),
            None => {
                tracing::warn!(device = %device, control = %control, "Value for unknown device");
            }
        }
    }

    /// `/devices/+/controls/+/on`
    fn handle_command(&mut self, message: Message) {
        tracing::debug!(topic = %message.topic, payload = %message.payload, "Incoming command");
        let Some(parsed) = topics::parse(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Ignoring unrecognised topic");
            return;
        };
        let Some(control) = named_control(&parsed) else {
            return;
        };
        let Some(device) = self.registry.get_mut(&parsed.device) else {
            tracing::warn!(device = %parsed.device, "Command for unknown device");
            return;
        };
        if device.send_value(control, &message.payload) {
            self.publish(Message::retained(
                topics::value_topic(&parsed.device, control),
                message.payload,
            ));
        }
    }

    /// `/devices/+/meta/name`
    fn handle_device_title(&mut self, message: Message) {
        if let Some((_, device)) = self.external_target(&message) {
            device.set_title(&message.payload);
        }
    }

    /// `/devices/+/controls/+`
    fn handle_external_value(&mut self, message: Message) {
        if let Some((parsed, device)) = self.external_target(&message) {
            if let Some(control) = named_control(&parsed) {
                device.send_value(control, &message.payload);
            }
        }
    }

    /// `/devices/+/controls/+/meta/type`
    fn handle_external_type(&mut self, message: Message) {
        if let Some((parsed, device)) = self.external_target(&message) {
            if let Some(control) = named_control(&parsed) {
                device.send_control_type(control, &message.payload);
            }
        }
    }

    /// `/devices/+/controls/+/meta/max`
    fn handle_external_max(&mut self, message: Message) {
        let Some((parsed, device)) = self.external_target(&message) else {
            return;
        };
        let Some(control) = named_control(&parsed) else {
            return;
        };
        match topics::parse_max(&message.payload) {
            Ok(max) => device.send_control_range(control, max),
            Err(err) => tracing::warn!(
                error = %err,
                device = %parsed.device,
                control = %control,
                "Cannot parse max value"
            ),
        }
    }

    /// Resolve `name` to an external device, admitting it if the configuration
    /// and the model allow it.
    ///
    /// Returns `Ok(None)` when a local device owns the name.
    ///
    /// # Errors
    ///
    /// Returns error if the device is unknown and cannot be admitted.
    pub fn ensure_external_device(
        &mut self,
        name: &str,
    ) -> Result<Option<&mut dyn ExternalDevice>, AdmissionError> {
        admission::admit(
            &mut self.registry,
            self.model.as_mut(),
            self.config.accepts_external_devices,
            name,
            &self.handle,
        )
    }

    /// Resolve the external device a message is about, admitting it if needed.
    ///
    /// `None` means the message is to be dropped: unparseable topic, a local
    /// device owning the name, or a failed admission.
    fn external_target(&mut self, message: &Message) -> Option<(ParsedTopic, &mut dyn ExternalDevice)> {
        let Some(parsed) = topics::parse(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Ignoring unrecognised topic");
            return None;
        };
        match self.ensure_external_device(&parsed.device) {
            Ok(Some(device)) => Some((parsed, device)),
            Ok(None) => None,
            Err(err @ AdmissionError::UnknownDevice(_)) => {
                tracing::warn!(error = %err, topic = %message.topic, "Not registering external device");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, topic = %message.topic, "Cannot register external device");
                None
            }
        }
    }
}

fn named_control(parsed: &ParsedTopic) -> Option<&str> {
    match parsed.control() {
        Ok(control) => Some(control),
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring message");
            None
        }
    }
}

/// Loop state: the core plus the receiving ends of its queues.
struct Dispatcher {
    core: DriverCore,
    events: mpsc::Receiver<Callback>,
    polls: mpsc::Receiver<()>,
}

impl Dispatcher {
    /// Start the core on this thread, report the outcome through `started`,
    /// then run the loop until `quit` fires.
    fn run(
        mut self,
        started: oneshot::Sender<Result<(), DriverError>>,
        quit: oneshot::Receiver<()>,
    ) -> Self {
        let overflow = self.core.handle.overflow.clone();
        overflow.claim();
        match self.prepare() {
            Ok(runtime) => {
                let _ = started.send(Ok(()));
                runtime.block_on(self.dispatch(quit));
            }
            Err(err) => {
                let _ = started.send(Err(err));
            }
        }
        overflow.release();
        self
    }

    fn prepare(&mut self) -> Result<Runtime, DriverError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(DriverError::Runtime)?;
        self.core.start()?;
        Ok(runtime)
    }

    /// Run deferred callbacks after the callbacks queued ahead of them.
    fn run_overflow(&mut self) {
        let overflow = self.core.handle.overflow.take();
        if overflow.is_empty() {
            return;
        }
        let mut batch = Vec::with_capacity(EVENT_QUEUE_LEN + overflow.len());
        while batch.len() < EVENT_QUEUE_LEN {
            match self.events.try_recv() {
                Ok(callback) => batch.push(callback),
                Err(_) => break,
            }
        }
        batch.extend(overflow);
        for callback in batch {
            callback(&mut self.core);
        }
    }

    async fn dispatch(&mut self, mut quit: oneshot::Receiver<()>) {
        let mut ticker = self
            .core
            .config
            .auto_poll
            .then(|| poll_ticker(self.core.config.poll_interval));

        tracing::info!("Driver loop running");
        loop {
            self.run_overflow();
            tokio::select! {
                _ = &mut quit => {
                    tracing::info!("Driver: stopping the client");
                    break;
                }
                () = next_tick(&mut ticker) => self.core.poll_model(),
                Some(()) = self.polls.recv() => self.core.poll_model(),
                Some(callback) = self.events.recv() => callback(&mut self.core),
            }
        }
        self.core.shutdown();
    }
}

fn poll_ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct Worker {
    quit: oneshot::Sender<()>,
    thread: JoinHandle<Option<Dispatcher>>,
}

fn join(thread: JoinHandle<Option<Dispatcher>>) -> Option<Dispatcher> {
    match thread.join() {
        Ok(dispatcher) => dispatcher,
        Err(_) => {
            tracing::error!("Driver loop panicked");
            None
        }
    }
}

/// Transfers data between a [`Model`] and a [`Transport`].
pub struct Driver {
    config: DriverConfig,
    handle: DriverHandle,
    dispatcher: Option<Dispatcher>,
    worker: Option<Worker>,
}

impl Driver {
    /// Create a driver with the default configuration.
    ///
    /// The model is immediately given a handle to the driver.
    pub fn new(model: impl Model + 'static, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(model, transport, DriverConfig::default())
    }

    /// Create a driver with the given configuration.
    pub fn with_config(
        model: impl Model + 'static,
        transport: Arc<dyn Transport>,
        config: DriverConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let (polls_tx, polls_rx) = mpsc::channel(1);
        let handle = DriverHandle {
            events: events_tx,
            polls: polls_tx,
            overflow: Arc::new(Overflow::default()),
        };

        let mut model: Box<dyn Model> = Box::new(model);
        model.observe(handle.clone());

        let core = DriverCore {
            config: config.clone(),
            model,
            transport,
            registry: DeviceRegistry::new(),
            handle: handle.clone(),
            subscriptions: HashSet::new(),
        };

        Self {
            config,
            handle,
            dispatcher: Some(Dispatcher {
                core,
                events: events_rx,
                polls: polls_rx,
            }),
            worker: None,
        }
    }

    /// Handle for queueing work onto the driver.
    #[must_use]
    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Whether the dispatch loop is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Enable or disable periodic polling. Takes effect on the next start.
    pub fn set_auto_poll(&mut self, auto_poll: bool) {
        self.config.auto_poll = auto_poll;
    }

    /// Set the polling interval. Takes effect on the next start.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.config.poll_interval = interval;
    }

    /// Accept or reject devices announced by other participants.
    ///
    /// # Panics
    ///
    /// Panics if the driver is active.
    pub fn set_accepts_external_devices(&mut self, accepts: bool) {
        assert!(
            !self.is_active(),
            "trying to change accepts_external_devices on an active driver"
        );
        self.config.accepts_external_devices = accepts;
    }

    /// Request a model poll on the dispatch thread.
    pub fn poll(&self) {
        self.handle.poll();
    }

    /// Launch the dispatch thread, start the transport and the model on it,
    /// then run the loop.
    ///
    /// Returns once the model has started. Devices announced from
    /// [`Model::start`] are processed as soon as the loop runs. Starting an
    /// active driver does nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the transport or the model fails to start. The driver
    /// stays inactive; a started transport is left running.
    pub fn start(&mut self) -> Result<(), DriverError> {
        if self.is_active() {
            return Ok(());
        }
        let mut dispatcher = self.dispatcher.take().ok_or(DriverError::WorkerLost)?;
        dispatcher.core.config = self.config.clone();

        // The dispatcher is handed over after the spawn so a failed spawn
        // leaves it here.
        let (handoff_tx, handoff_rx) = oneshot::channel::<Dispatcher>();
        let (started_tx, started_rx) = oneshot::channel();
        let (quit_tx, quit_rx) = oneshot::channel();
        let spawned = thread::Builder::new()
            .name("devbridge-driver".to_string())
            .spawn(move || {
                let dispatcher = handoff_rx.blocking_recv().ok()?;
                Some(dispatcher.run(started_tx, quit_rx))
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                self.dispatcher = Some(dispatcher);
                return Err(DriverError::Spawn(err));
            }
        };
        if let Err(dispatcher) = handoff_tx.send(dispatcher) {
            self.dispatcher = Some(dispatcher);
            return Err(DriverError::WorkerLost);
        }

        match futures::executor::block_on(tokio::task::unconstrained(started_rx)) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.dispatcher = join(thread);
                return Err(err);
            }
            Err(_) => {
                self.dispatcher = join(thread);
                return Err(DriverError::WorkerLost);
            }
        }

        tracing::info!(
            auto_poll = self.config.auto_poll,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            accepts_external_devices = self.config.accepts_external_devices,
            "Driver started"
        );
        self.worker = Some(Worker {
            quit: quit_tx,
            thread,
        });
        Ok(())
    }

    /// Stop the loop, the model and the transport, and wait for teardown.
    ///
    /// Stopping an inactive driver does nothing.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        tracing::debug!("Stopping driver");
        let _ = worker.quit.send(());
        self.dispatcher = join(worker.thread);
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop();
    }
}
