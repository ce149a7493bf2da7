//! Driver configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between model polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Poll the model periodically
    pub auto_poll: bool,

    /// Interval between automatic polls
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// Mirror devices announced by other participants
    pub accepts_external_devices: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            auto_poll: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            accepts_external_devices: false,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DriverConfig::default();
        assert!(config.auto_poll);
        assert_eq!(config.poll_interval, Duration::from_millis(5000));
        assert!(!config.accepts_external_devices);
    }

    #[test]
    fn poll_interval_in_millis() {
        let config: DriverConfig =
            serde_json::from_str(r#"{"poll_interval": 250, "accepts_external_devices": true}"#)
                .unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert!(config.accepts_external_devices);
        assert!(config.auto_poll);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["poll_interval"], 250);
    }
}
