//! Topic scheme for devices and controls.
//!
//! Topic structure:
//! - `/devices/{device}/meta/name`
//! - `/devices/{device}/controls/{control}[/on | /meta/{type,order,max}]`
//!
//! Builders produce exact wire strings; [`parse`] maps an incoming topic back
//! to its device, control and kind by fixed segment position.

use serde::{Deserialize, Serialize};

/// Root of every device topic.
pub const DEVICES_ROOT: &str = "/devices";

/// Subscription pattern for device titles announced by other participants.
pub const DEVICE_TITLE_PATTERN: &str = "/devices/+/meta/name";

/// Subscription pattern for control values.
pub const CONTROL_VALUE_PATTERN: &str = "/devices/+/controls/+";

/// Subscription pattern for control types.
pub const CONTROL_TYPE_PATTERN: &str = "/devices/+/controls/+/meta/type";

/// Subscription pattern for control ranges.
pub const CONTROL_MAX_PATTERN: &str = "/devices/+/controls/+/meta/max";

/// Topic of a device, with optional suffix segments.
#[must_use]
pub fn device_topic(device: &str, suffix: &[&str]) -> String {
    let mut topic = format!("{DEVICES_ROOT}/{device}");
    for part in suffix {
        topic.push('/');
        topic.push_str(part);
    }
    topic
}

/// Topic of a control, with optional suffix segments.
#[must_use]
pub fn control_topic(device: &str, control: &str, suffix: &[&str]) -> String {
    let mut parts = vec!["controls", control];
    parts.extend_from_slice(suffix);
    device_topic(device, &parts)
}

/// `/devices/{device}/meta/name`
#[must_use]
pub fn device_name_topic(device: &str) -> String {
    device_topic(device, &["meta", "name"])
}

/// `/devices/{device}/controls/{control}`
#[must_use]
pub fn value_topic(device: &str, control: &str) -> String {
    control_topic(device, control, &[])
}

/// `/devices/{device}/controls/{control}/on`
#[must_use]
pub fn command_topic(device: &str, control: &str) -> String {
    control_topic(device, control, &["on"])
}

/// `/devices/{device}/controls/{control}/meta/type`
#[must_use]
pub fn type_topic(device: &str, control: &str) -> String {
    control_topic(device, control, &["meta", "type"])
}

/// `/devices/{device}/controls/{control}/meta/order`
#[must_use]
pub fn order_topic(device: &str, control: &str) -> String {
    control_topic(device, control, &["meta", "order"])
}

/// `/devices/{device}/controls/{control}/meta/max`
#[must_use]
pub fn max_topic(device: &str, control: &str) -> String {
    control_topic(device, control, &["meta", "max"])
}

/// Payload for a control range, `None` when there is no range to announce.
///
/// Negative maximums mean "no range".
#[must_use]
pub fn format_max(max: Option<f64>) -> Option<String> {
    max.filter(|max| *max >= 0.0).map(format_number)
}

/// Shortest decimal form of `value`, in exponent notation (`1e+06`,
/// `2.5e-05`) when the decimal exponent is below -4 or at least 6.
/// Infinities are written `+Inf` and `-Inf`.
fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let scientific = format!("{value:e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return value.to_string();
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return value.to_string();
    };
    if (-4..6).contains(&exponent) {
        return value.to_string();
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

/// Parse a `meta/max` payload.
///
/// # Errors
///
/// Returns error if the payload is not a decimal number.
pub fn parse_max(payload: &str) -> Result<f64, TopicError> {
    payload
        .trim()
        .parse()
        .map_err(|_| TopicError::InvalidNumber(payload.to_string()))
}

/// What a topic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// Device title
    DeviceName,
    /// Current control value
    Value,
    /// Command to a control
    Command,
    /// Control type
    ControlType,
    /// Control declaration order
    ControlOrder,
    /// Control range
    ControlMax,
}

/// Components of a recognised device topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTopic {
    /// Device name
    pub device: String,
    /// Control name, absent for device-level topics
    pub control: Option<String>,
    /// Topic kind
    pub kind: TopicKind,
}

impl ParsedTopic {
    /// Control name, or an error for device-level topics.
    ///
    /// # Errors
    ///
    /// Returns error if the topic does not name a control.
    pub fn control(&self) -> Result<&str, TopicError> {
        self.control
            .as_deref()
            .ok_or_else(|| TopicError::MissingControl(self.device.clone()))
    }
}

/// Parse a topic to extract components.
///
/// Returns `None` for topics outside the device scheme.
#[must_use]
pub fn parse(topic: &str) -> Option<ParsedTopic> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 3 || !parts[0].is_empty() || parts[1] != "devices" || parts[2].is_empty() {
        return None;
    }
    let device = parts[2].to_string();

    let (control, kind) = match &parts[3..] {
        ["meta", "name"] => (None, TopicKind::DeviceName),
        ["controls", control] => (Some(*control), TopicKind::Value),
        ["controls", control, "on"] => (Some(*control), TopicKind::Command),
        ["controls", control, "meta", "type"] => (Some(*control), TopicKind::ControlType),
        ["controls", control, "meta", "order"] => (Some(*control), TopicKind::ControlOrder),
        ["controls", control, "meta", "max"] => (Some(*control), TopicKind::ControlMax),
        _ => return None,
    };
    if control.is_some_and(str::is_empty) {
        return None;
    }

    Some(ParsedTopic {
        device,
        control: control.map(str::to_string),
        kind,
    })
}

/// Errors from topic and payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Payload is not a number
    #[error("invalid numeric payload: {0:?}")]
    InvalidNumber(String),
    /// Topic does not name a control
    #[error("topic for device {0} names no control")]
    MissingControl(String),
}
