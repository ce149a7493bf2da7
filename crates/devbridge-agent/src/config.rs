//! Agent configuration.

use anyhow::{bail, Context, Result};
use devbridge_adapter_mqtt::MqttTransportConfig;
use devbridge_core::DriverConfig;
use std::time::Duration;
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// MQTT connection settings
    pub mqtt: MqttTransportConfig,

    /// Driver settings
    pub driver: DriverConfig,

    /// Name of the local heartbeat device
    pub device_name: String,

    /// External devices the agent refuses to mirror
    pub ignored_devices: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttTransportConfig {
                client_id: format!("devbridge-{}", Uuid::new_v4()),
                ..MqttTransportConfig::default()
            },
            driver: DriverConfig {
                accepts_external_devices: true,
                ..DriverConfig::default()
            },
            device_name: "devbridge".to_string(),
            ignored_devices: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DEVBRIDGE_MQTT_BROKER`: MQTT broker URL
    /// - `DEVBRIDGE_CLIENT_ID`: MQTT client id
    /// - `DEVBRIDGE_DEVICE_NAME`: Heartbeat device name
    /// - `DEVBRIDGE_POLL_INTERVAL_MS`: Poll interval in milliseconds
    /// - `DEVBRIDGE_AUTO_POLL`: Poll periodically (`true`/`false`)
    /// - `DEVBRIDGE_ACCEPT_EXTERNAL`: Mirror external devices (`true`/`false`)
    /// - `DEVBRIDGE_IGNORED_DEVICES`: JSON array of device names not to mirror
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(broker) = lookup("DEVBRIDGE_MQTT_BROKER") {
            config.mqtt.broker = broker;
        }

        if let Some(client_id) = lookup("DEVBRIDGE_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }

        if let Some(name) = lookup("DEVBRIDGE_DEVICE_NAME") {
            if name.is_empty() || name.contains(['/', '+', '#']) {
                bail!("Invalid DEVBRIDGE_DEVICE_NAME: {name:?}");
            }
            config.device_name = name;
        }

        if let Some(interval) = lookup("DEVBRIDGE_POLL_INTERVAL_MS") {
            let millis: u64 = interval
                .parse()
                .context("Invalid DEVBRIDGE_POLL_INTERVAL_MS")?;
            config.driver.poll_interval = Duration::from_millis(millis);
        }

        if let Some(auto_poll) = lookup("DEVBRIDGE_AUTO_POLL") {
            config.driver.auto_poll = parse_flag(&auto_poll).context("Invalid DEVBRIDGE_AUTO_POLL")?;
        }

        if let Some(accept) = lookup("DEVBRIDGE_ACCEPT_EXTERNAL") {
            config.driver.accepts_external_devices =
                parse_flag(&accept).context("Invalid DEVBRIDGE_ACCEPT_EXTERNAL")?;
        }

        if let Some(ignored) = lookup("DEVBRIDGE_IGNORED_DEVICES") {
            config.ignored_devices =
                serde_json::from_str(&ignored).context("Invalid DEVBRIDGE_IGNORED_DEVICES JSON")?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}
