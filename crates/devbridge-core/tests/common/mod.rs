#![allow(dead_code)]

use devbridge_core::{
    BoxError, Control, Device, DeviceHandle, DriverConfig, DriverHandle, ExtendedModel,
    ExternalDevice, Model,
};
use std::sync::{Arc, Mutex};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn manual_config(accepts_external_devices: bool) -> DriverConfig {
    DriverConfig {
        auto_poll: false,
        accepts_external_devices,
        ..DriverConfig::default()
    }
}

/// Drain whatever is queued, including work queued by the work itself.
pub fn settle(handle: &DriverHandle) {
    for _ in 0..4 {
        handle.call_and_wait(|_| ()).unwrap();
    }
}

pub struct FakeDevice {
    name: String,
    title: String,
    echo: bool,
    log: Log,
}

impl FakeDevice {
    pub fn new(name: &str, title: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            echo: true,
            log: log.clone(),
        }
    }

    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl Device for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn send_value(&mut self, control: &str, value: &str) -> bool {
        self.log
            .lock()
            .unwrap()
            .push(format!("local {}: send_value({control}, {value})", self.name));
        self.echo
    }

    fn observe(&mut self, _observer: DriverHandle) {}
}

pub struct FakeExternalDevice {
    name: String,
    title: String,
    log: Log,
}

impl Device for FakeExternalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn send_value(&mut self, control: &str, value: &str) -> bool {
        self.log
            .lock()
            .unwrap()
            .push(format!("external {}: send_value({control}, {value})", self.name));
        false
    }

    fn observe(&mut self, _observer: DriverHandle) {}
}

impl ExternalDevice for FakeExternalDevice {
    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
        self.log
            .lock()
            .unwrap()
            .push(format!("external {}: set_title({title})", self.name));
    }

    fn send_control_type(&mut self, control: &str, control_type: &str) {
        self.log.lock().unwrap().push(format!(
            "external {}: send_control_type({control}, {control_type})",
            self.name
        ));
    }

    fn send_control_range(&mut self, control: &str, max: f64) {
        self.log.lock().unwrap().push(format!(
            "external {}: send_control_range({control}, {max})",
            self.name
        ));
    }
}

pub struct FakeModel {
    log: Log,
    extended: bool,
    refuse: Vec<String>,
}

impl FakeModel {
    pub fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            extended: false,
            refuse: Vec::new(),
        }
    }

    pub fn extended(log: &Log) -> Self {
        Self {
            extended: true,
            ..Self::new(log)
        }
    }

    pub fn refusing(mut self, name: &str) -> Self {
        self.refuse.push(name.to_string());
        self
    }

    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl Model for FakeModel {
    fn start(&mut self) -> Result<(), BoxError> {
        self.push("model: start".to_string());
        Ok(())
    }

    fn stop(&mut self) {
        self.push("model: stop".to_string());
    }

    fn poll(&mut self) {
        self.push("model: poll".to_string());
    }

    fn observe(&mut self, _observer: DriverHandle) {}

    fn as_extended(&mut self) -> Option<&mut dyn ExtendedModel> {
        if self.extended {
            Some(self)
        } else {
            None
        }
    }
}

impl ExtendedModel for FakeModel {
    fn add_device(&mut self, name: &str) -> Result<Box<dyn ExternalDevice>, BoxError> {
        self.push(format!("model: add_device({name})"));
        if self.refuse.iter().any(|refused| refused == name) {
            return Err(format!("device {name} refused").into());
        }
        Ok(Box::new(FakeExternalDevice {
            name: name.to_string(),
            title: String::new(),
            log: self.log.clone(),
        }))
    }
}

/// Announces one local device with `controls` read-only controls from `start`.
pub struct AnnouncingModel {
    controls: usize,
    observer: Option<DriverHandle>,
}

impl AnnouncingModel {
    pub fn new(controls: usize) -> Self {
        Self {
            controls,
            observer: None,
        }
    }
}

impl Model for AnnouncingModel {
    fn start(&mut self) -> Result<(), BoxError> {
        let observer = self.observer.as_ref().ok_or("started without a driver")?;
        observer.on_new_device(DeviceHandle::local(FakeDevice::new("bulk", "Bulk", &new_log())));
        for i in 0..self.controls {
            observer.on_new_control("bulk", Control::new(format!("c{i}"), "value", "0").read_only());
        }
        Ok(())
    }

    fn observe(&mut self, observer: DriverHandle) {
        self.observer = Some(observer);
    }
}
