//! Session configuration

use crate::transport::PeripheralRecord;
use spiderlink_shared::{timing, DeviceClass};
use std::time::Duration;

/// Which peripheral a session should bind to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    /// First peripheral recognised as the configured device class
    #[default]
    Any,
    /// Exact hardware address / platform id or advertised name
    Device(String),
}

impl Identity {
    pub fn accepts(&self, record: &PeripheralRecord, class: &DeviceClass) -> bool {
        match self {
            Identity::Any => class.recognizes(record),
            Identity::Device(selector) => record.matches(selector),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Any => write!(f, "any minidrone"),
            Identity::Device(selector) => write!(f, "{}", selector),
        }
    }
}

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Peripheral to bind to
    pub identity: Identity,
    /// Recognition data used when `identity` is `Any`
    pub device_class: DeviceClass,
    /// Drive loop period
    pub tick_interval: Duration,
    /// Pause before the handshake and again after it is acknowledged
    pub settle_delay: Duration,
    /// Battery level at or below which `LowBattery` fires
    pub low_battery_percent: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: Identity::Any,
            device_class: DeviceClass::default(),
            tick_interval: Duration::from_millis(timing::TICK_INTERVAL_MS),
            settle_delay: Duration::from_millis(timing::SETTLE_DELAY_MS),
            low_battery_percent: timing::BATTERY_LOW_PERCENT,
        }
    }
}

impl SessionConfig {
    /// Default configuration bound to one device
    pub fn for_device(selector: impl Into<String>) -> Self {
        Self {
            identity: Identity::Device(selector.into()),
            ..Default::default()
        }
    }
}
