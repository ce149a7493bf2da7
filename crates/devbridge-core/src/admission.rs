//! Admission of devices announced by other participants.
//!
//! External devices are created lazily: the first message naming an unknown
//! device asks the model for a proxy. A device that never sends traffic is
//! never created.

use crate::driver::DriverHandle;
use crate::error::BoxError;
use crate::model::{DeviceHandle, ExternalDevice, Model};
use crate::registry::DeviceRegistry;

/// Resolve `name` to an external device, creating a proxy if allowed.
///
/// Returns `Ok(None)` when `name` belongs to a local device; local devices are
/// authoritative and the message must be ignored.
///
/// # Errors
///
/// Returns error if the device is unknown and cannot be admitted.
pub fn admit<'a>(
    registry: &'a mut DeviceRegistry,
    model: &mut dyn Model,
    accepts_external: bool,
    name: &str,
    observer: &DriverHandle,
) -> Result<Option<&'a mut dyn ExternalDevice>, AdmissionError> {
    if registry.contains(name) {
        return Ok(registry.get_mut(name).and_then(DeviceHandle::as_external_mut));
    }

    if !accepts_external {
        return Err(AdmissionError::UnknownDevice(name.to_string()));
    }

    let extended = model
        .as_extended()
        .ok_or_else(|| AdmissionError::MissingCapability(name.to_string()))?;
    let mut device = extended
        .add_device(name)
        .map_err(|source| AdmissionError::Model {
            device: name.to_string(),
            source,
        })?;

    tracing::info!(device = %name, "Admitted external device");
    device.observe(observer.clone());
    registry.register(DeviceHandle::External(device));

    Ok(registry.get_mut(name).and_then(DeviceHandle::as_external_mut))
}

/// Reasons an external device cannot be admitted.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// External devices are not accepted
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    /// The model cannot create external devices
    #[error("model does not support external devices (device {0})")]
    MissingCapability(String),
    /// The model refused to create the device
    #[error("model cannot add device {device}: {source}")]
    Model {
        /// Device name
        device: String,
        /// Model error
        source: BoxError,
    },
}
