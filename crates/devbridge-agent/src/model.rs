//! The agent's model: a heartbeat device plus mirrors of external devices.

use devbridge_core::{
    BoxError, Control, Device, DeviceHandle, DriverHandle, ExtendedModel, ExternalDevice, Model,
};
use std::collections::BTreeMap;
use std::time::Instant;

const UPTIME_CONTROL: &str = "uptime";
const NOTE_CONTROL: &str = "note";

/// Model run by the agent.
pub struct BridgeModel {
    device_name: String,
    ignored: Vec<String>,
    observer: Option<DriverHandle>,
    started_at: Option<Instant>,
    mirrored: Vec<String>,
}

impl BridgeModel {
    /// Create the model; `device_name` names the heartbeat device.
    pub fn new(device_name: impl Into<String>, ignored: Vec<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ignored,
            observer: None,
            started_at: None,
            mirrored: Vec::new(),
        }
    }
}

impl Model for BridgeModel {
    fn start(&mut self) -> Result<(), BoxError> {
        let observer = self
            .observer
            .as_ref()
            .ok_or("model started without a driver")?;

        self.started_at = Some(Instant::now());
        observer.on_new_device(DeviceHandle::local(HeartbeatDevice {
            name: self.device_name.clone(),
            note: String::new(),
        }));
        observer.on_new_control(
            self.device_name.as_str(),
            Control::new(UPTIME_CONTROL, "value", "0").read_only(),
        );
        observer.on_new_control(self.device_name.as_str(), Control::new(NOTE_CONTROL, "text", ""));
        tracing::info!(device = %self.device_name, "Heartbeat device announced");
        Ok(())
    }

    fn stop(&mut self) {
        tracing::info!(mirrored = self.mirrored.len(), "Model stopped");
    }

    fn poll(&mut self) {
        let (Some(observer), Some(started_at)) = (&self.observer, self.started_at) else {
            return;
        };
        let uptime = started_at.elapsed().as_secs();
        observer.on_value(self.device_name.as_str(), UPTIME_CONTROL, uptime.to_string());
        tracing::debug!(uptime, mirrored = self.mirrored.len(), "Polled");
    }

    fn observe(&mut self, observer: DriverHandle) {
        self.observer = Some(observer);
    }

    fn as_extended(&mut self) -> Option<&mut dyn ExtendedModel> {
        Some(self)
    }
}

impl ExtendedModel for BridgeModel {
    fn add_device(&mut self, name: &str) -> Result<Box<dyn ExternalDevice>, BoxError> {
        if self.ignored.iter().any(|ignored| ignored == name) {
            return Err(format!("device {name} is ignored").into());
        }
        self.mirrored.push(name.to_string());
        tracing::info!(device = %name, "Mirroring external device");
        Ok(Box::new(MirrorDevice::new(name)))
    }
}

/// Local device reporting the agent's uptime.
struct HeartbeatDevice {
    name: String,
    note: String,
}

impl Device for HeartbeatDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        "devbridge agent"
    }

    fn send_value(&mut self, control: &str, value: &str) -> bool {
        if control != NOTE_CONTROL {
            tracing::warn!(device = %self.name, control, "Rejecting write to read-only control");
            return false;
        }
        self.note = value.to_string();
        true
    }

    fn observe(&mut self, _observer: DriverHandle) {}
}

#[derive(Debug, Default, Clone, PartialEq)]
struct MirroredControl {
    control_type: Option<String>,
    max: Option<f64>,
    value: Option<String>,
}

/// Local copy of a device announced by another participant.
struct MirrorDevice {
    name: String,
    title: String,
    controls: BTreeMap<String, MirroredControl>,
}

impl MirrorDevice {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            controls: BTreeMap::new(),
        }
    }

    fn control(&mut self, control: &str) -> &mut MirroredControl {
        self.controls.entry(control.to_string()).or_default()
    }
}

impl Device for MirrorDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn send_value(&mut self, control: &str, value: &str) -> bool {
        let name = self.name.clone();
        let entry = self.control(control);
        let previous = entry.value.replace(value.to_string());
        tracing::debug!(
            device = %name,
            control,
            value,
            previous = ?previous,
            control_type = ?entry.control_type,
            max = ?entry.max,
            "Mirrored value"
        );
        false
    }

    fn observe(&mut self, _observer: DriverHandle) {}
}

impl ExternalDevice for MirrorDevice {
    fn set_title(&mut self, title: &str) {
        tracing::info!(device = %self.name, title, "Mirrored title");
        self.title = title.to_string();
    }

    fn send_control_type(&mut self, control: &str, control_type: &str) {
        tracing::info!(device = %self.name, control, control_type, "Mirrored control");
        self.control(control).control_type = Some(control_type.to_string());
    }

    fn send_control_range(&mut self, control: &str, max: f64) {
        self.control(control).max = Some(max);
    }
}
