//! Broker address parsing.

use crate::transport::MqttTransportError;
use url::Url;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Parse a broker address into host and port.
///
/// Accepts `tcp://host[:port]`, `mqtt://host[:port]` and bare `host[:port]`.
///
/// # Errors
///
/// Returns error if the address is malformed or uses another scheme.
pub fn parse_broker_url(input: &str) -> Result<(String, u16), MqttTransportError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| MqttTransportError::InvalidUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(MqttTransportError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MqttTransportError::InvalidUrl(format!("{input}: missing host")))?;
        return Ok((host.to_string(), url.port().unwrap_or(DEFAULT_PORT)));
    }

    let (host, port) = match input.split_once(':') {
        None => (input, DEFAULT_PORT),
        Some((_, port)) if port.contains(':') => {
            return Err(MqttTransportError::InvalidUrl(format!(
                "{input}: too many ':' separators"
            )));
        }
        Some((host, port)) => (
            host,
            port.parse().map_err(|_| {
                MqttTransportError::InvalidUrl(format!("{input}: invalid port '{port}'"))
            })?,
        ),
    };
    if host.is_empty() {
        return Err(MqttTransportError::InvalidUrl(format!("{input}: missing host")));
    }

    Ok((host.to_string(), port))
}
