//! # devbridge Agent
//!
//! Connects a [`BridgeModel`] to an MQTT broker through the driver.
//!
//! The agent:
//! 1. Announces a local heartbeat device whose `uptime` control is refreshed
//!    on every poll and whose `note` control accepts commands
//! 2. Mirrors devices announced by other participants as they send traffic
//! 3. Stops cleanly on Ctrl+C

use anyhow::{Context, Result};
use devbridge_adapter_mqtt::MqttTransport;
use devbridge_core::Driver;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod model;

pub use config::BridgeConfig;
pub use model::BridgeModel;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting devbridge agent"
    );

    let config = BridgeConfig::from_env()?;
    tracing::info!(
        broker = %config.mqtt.broker,
        client_id = %config.mqtt.client_id,
        device = %config.device_name,
        "Configuration loaded"
    );

    let transport = MqttTransport::new(&config.mqtt, tokio::runtime::Handle::current())
        .context("Failed to create MQTT transport")?;
    let model = BridgeModel::new(config.device_name.clone(), config.ignored_devices.clone());
    let mut driver = Driver::with_config(model, Arc::new(transport), config.driver.clone());

    driver.start().context("Failed to start driver")?;
    tracing::info!("Agent running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown signal received");

    tokio::task::spawn_blocking(move || driver.stop())
        .await
        .context("Driver shutdown panicked")?;

    tracing::info!("Agent stopped");
    Ok(())
}
