//! Model and device capabilities consumed by the driver.
//!
//! A [`Model`] owns the devices of the host process and announces them to the
//! driver through the [`DriverHandle`] it receives in [`Model::observe`]. Every
//! announcement is queued onto the driver loop, so models may raise events from
//! any thread.

use crate::driver::DriverHandle;
use crate::error::BoxError;
use serde::{Deserialize, Serialize};

/// The host-side source of devices.
pub trait Model: Send {
    /// Bring the model up. Devices may be announced from here.
    ///
    /// # Errors
    ///
    /// Returns error if the model cannot start; the driver stays inactive.
    fn start(&mut self) -> Result<(), BoxError>;

    /// Shut the model down. Called on the driver thread.
    fn stop(&mut self) {}

    /// Refresh device state. Called on the driver thread.
    fn poll(&mut self) {}

    /// Register the driver as the single recipient of device events.
    fn observe(&mut self, observer: DriverHandle);

    /// Access to external-device support, if the model has it.
    fn as_extended(&mut self) -> Option<&mut dyn ExtendedModel> {
        None
    }
}

/// A model able to create proxies for devices announced elsewhere.
pub trait ExtendedModel: Model {
    /// Create a proxy for the external device `name`.
    ///
    /// # Errors
    ///
    /// Returns error if the model refuses the device.
    fn add_device(&mut self, name: &str) -> Result<Box<dyn ExternalDevice>, BoxError>;
}

/// A device owned by the host process.
pub trait Device: Send {
    /// Unique device name, used in topics.
    fn name(&self) -> &str;

    /// Human readable title.
    fn title(&self) -> &str;

    /// Deliver a value to the control `control`.
    ///
    /// Returns `true` when the driver should echo the value back as the
    /// control's current value.
    fn send_value(&mut self, control: &str, value: &str) -> bool;

    /// Register the driver as recipient of control and value events.
    fn observe(&mut self, observer: DriverHandle);
}

/// Proxy for a device whose metadata is announced by another participant.
pub trait ExternalDevice: Device {
    /// Apply an announced title.
    fn set_title(&mut self, title: &str);

    /// Apply an announced control type.
    fn send_control_type(&mut self, control: &str, control_type: &str);

    /// Apply an announced control range.
    fn send_control_range(&mut self, control: &str, max: f64);
}

/// A registered device, tagged by capability set.
pub enum DeviceHandle {
    /// Host-owned device
    Local(Box<dyn Device>),
    /// Proxy for a device announced elsewhere
    External(Box<dyn ExternalDevice>),
}

impl DeviceHandle {
    /// Wrap a host-owned device.
    pub fn local(device: impl Device + 'static) -> Self {
        Self::Local(Box::new(device))
    }

    /// Wrap an external device proxy.
    pub fn external(device: impl ExternalDevice + 'static) -> Self {
        Self::External(Box::new(device))
    }

    /// Whether this entry is a proxy for an external device.
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    /// Device name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Local(device) => device.name(),
            Self::External(device) => device.name(),
        }
    }

    /// Device title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::Local(device) => device.title(),
            Self::External(device) => device.title(),
        }
    }

    /// Deliver a value, returning whether it should be echoed.
    pub fn send_value(&mut self, control: &str, value: &str) -> bool {
        match self {
            Self::Local(device) => device.send_value(control, value),
            Self::External(device) => device.send_value(control, value),
        }
    }

    /// Register the driver as observer.
    pub fn observe(&mut self, observer: DriverHandle) {
        match self {
            Self::Local(device) => device.observe(observer),
            Self::External(device) => device.observe(observer),
        }
    }

    /// Borrow the external capability, `None` for local devices.
    pub fn as_external_mut(&mut self) -> Option<&mut dyn ExternalDevice> {
        match self {
            Self::Local(_) => None,
            Self::External(device) => Some(device.as_mut()),
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name())
            .field("external", &self.is_external())
            .finish()
    }
}

/// A control announced by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Control name, unique within the device
    pub name: String,
    /// Control type, e.g. `temperature` or `switch`
    pub control_type: String,
    /// Initial value
    pub value: String,
    /// Read-only controls accept no commands
    pub read_only: bool,
    /// Upper bound of the value range, if any
    pub max: Option<f64>,
}

impl Control {
    /// Writable control without a range.
    pub fn new(
        name: impl Into<String>,
        control_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            control_type: control_type.into(),
            value: value.into(),
            read_only: false,
            max: None,
        }
    }

    /// Mark the control read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Attach a range maximum.
    #[must_use]
    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }
}
