//! # devbridge Core
//!
//! Bridges a device/control model onto a publish/subscribe transport.
//!
//! This crate provides:
//! - Capability traits for models, devices and transports
//! - The device registry with stable per-device control ordering
//! - Admission of devices announced by other participants
//! - The [`Driver`], a single-threaded loop that serializes every mutation of
//!   model and device state
//! - An in-memory broker for tests and embedding

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod config;
pub mod driver;
pub mod error;
pub mod memory;
pub mod model;
pub mod registry;
pub mod transport;

pub use admission::AdmissionError;
pub use config::DriverConfig;
pub use driver::{Callback, Driver, DriverCore, DriverHandle, EVENT_QUEUE_LEN};
pub use error::{BoxError, DriverError};
pub use memory::{BrokerEvent, MemoryBroker, MemoryTransport};
pub use model::{Control, Device, DeviceHandle, ExtendedModel, ExternalDevice, Model};
pub use registry::DeviceRegistry;
pub use transport::{MessageHandler, Transport, TransportError};
