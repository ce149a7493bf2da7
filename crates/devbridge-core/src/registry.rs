//! Device registry and control ordering.

use crate::model::DeviceHandle;
use std::collections::HashMap;

/// Devices known to the driver, keyed by name.
///
/// Also assigns each control a declaration order: the Nth distinct control
/// seen for a device gets order N. Orders survive device replacement.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceHandle>,
    next_order: HashMap<String, u32>,
    orders: HashMap<(String, String), u32>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `device`, replacing any entry with the same name.
    ///
    /// Returns `true` when the device's name metadata should be published,
    /// i.e. when it is not an external proxy.
    pub fn register(&mut self, device: DeviceHandle) -> bool {
        let announce = !device.is_external();
        let name = device.name().to_string();
        if let Some(previous) = self.devices.insert(name.clone(), device) {
            tracing::debug!(
                device = %name,
                was_external = previous.is_external(),
                "Replaced registered device"
            );
        }
        announce
    }

    /// Record that `control` of `device` was observed.
    ///
    /// Returns the newly assigned order on first sight, `None` afterwards.
    pub fn control_first_seen(&mut self, device: &str, control: &str) -> Option<u32> {
        let key = (device.to_string(), control.to_string());
        if self.orders.contains_key(&key) {
            return None;
        }
        let next = self.next_order.entry(device.to_string()).or_insert(1);
        let order = *next;
        *next += 1;
        self.orders.insert(key, order);
        Some(order)
    }

    /// Declaration order of a control, if it has been seen.
    #[must_use]
    pub fn control_order(&self, device: &str, control: &str) -> Option<u32> {
        self.orders
            .get(&(device.to_string(), control.to_string()))
            .copied()
    }

    /// Look up a device.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DeviceHandle> {
        self.devices.get(name)
    }

    /// Look up a device for mutation.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut DeviceHandle> {
        self.devices.get_mut(name)
    }

    /// Whether a device with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Number of registered devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Registered device names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverHandle;
    use crate::model::{Device, ExternalDevice};

    struct Stub {
        name: String,
    }

    impl Device for Stub {
        fn name(&self) -> &str {
            &self.name
        }
        fn title(&self) -> &str {
            &self.name
        }
        fn send_value(&mut self, _control: &str, _value: &str) -> bool {
            false
        }
        fn observe(&mut self, _observer: DriverHandle) {}
    }

    impl ExternalDevice for Stub {
        fn set_title(&mut self, _title: &str) {}
        fn send_control_type(&mut self, _control: &str, _control_type: &str) {}
        fn send_control_range(&mut self, _control: &str, _max: f64) {}
    }

    fn stub(name: &str) -> Stub {
        Stub {
            name: name.to_string(),
        }
    }

    #[test]
    fn orders_count_per_device() {
        let mut registry = DeviceRegistry::new();

        assert_eq!(registry.control_first_seen("a", "x"), Some(1));
        assert_eq!(registry.control_first_seen("a", "y"), Some(2));
        assert_eq!(registry.control_first_seen("b", "x"), Some(1));
        assert_eq!(registry.control_first_seen("a", "z"), Some(3));
    }

    #[test]
    fn reobserving_keeps_order() {
        let mut registry = DeviceRegistry::new();

        registry.control_first_seen("a", "x");
        registry.control_first_seen("a", "y");
        assert_eq!(registry.control_first_seen("a", "x"), None);
        assert_eq!(registry.control_order("a", "x"), Some(1));
        assert_eq!(registry.control_first_seen("a", "w"), Some(3));
    }

    #[test]
    fn only_local_devices_are_announced() {
        let mut registry = DeviceRegistry::new();

        assert!(registry.register(DeviceHandle::local(stub("local"))));
        assert!(!registry.register(DeviceHandle::external(stub("remote"))));
        assert_eq!(registry.names(), vec!["local", "remote"]);
    }

    #[test]
    fn local_overwrites_external() {
        let mut registry = DeviceRegistry::new();
        registry.register(DeviceHandle::external(stub("d")));
        registry.control_first_seen("d", "x");

        assert!(registry.register(DeviceHandle::local(stub("d"))));
        assert_eq!(registry.len(), 1);
        assert!(!registry.get("d").unwrap().is_external());
        assert!(registry.get_mut("d").unwrap().as_external_mut().is_none());
        // ordering is keyed by name and survives replacement
        assert_eq!(registry.control_first_seen("d", "y"), Some(2));
    }
}
