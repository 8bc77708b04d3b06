//! SpiderLink Shared Protocol Types
//!
//! This crate provides the frame codec, channel sequencing and state machines
//! used to talk to minidrone quadcopters over their BLE GATT characteristics.
//! Everything here is pure: no I/O, no async.

pub mod codec;
pub mod sequencer;
pub mod state_machine;

pub use codec::{CodecError, FlipDirection, Setpoint};
pub use sequencer::{Channel, ChannelSequencer};
pub use state_machine::{FlightState, LinkEvent, LinkState, LinkStateMachine, TransitionResult};

/// Timing parameters mandated by the drone firmware
pub mod timing {
    /// Drive/ping loop period in milliseconds
    pub const TICK_INTERVAL_MS: u64 = 50;

    /// Delay between subscribing notifications and writing the handshake,
    /// and again between the handshake ack and declaring the link ready
    pub const SETTLE_DELAY_MS: u64 = 100;

    /// Default enrollment window for a swarm, in seconds
    pub const ENROLLMENT_TIMEOUT_SECS: u64 = 30;

    /// Battery percentage at or below which a low-battery warning is raised
    pub const BATTERY_LOW_PERCENT: u8 = 20;
}

/// Short ids of the GATT characteristics the firmware exposes.
///
/// A characteristic is identified by the four hex digits embedded in its
/// 128-bit UUID (e.g. `9a66fa0a-0800-9191-11e4-012d1540cb8e` -> `fa0a`).
pub mod characteristics {
    /// Motion setpoints, written every tick
    pub const DRIVE: &str = "fa0a";
    /// Flight and configuration commands (and the handshake)
    pub const COMMAND: &str = "fa0b";
    /// Emergency motor cut-off
    pub const EMERGENCY: &str = "fa0c";
    /// Battery level notifications
    pub const BATTERY: &str = "fb0f";
    /// Flying-state notifications
    pub const FLIGHT_STATUS: &str = "fb0e";

    /// Notification channels that are drained but not interpreted
    pub const AUXILIARY: [&str; 8] = [
        "fb1b", "fb1c", "fd22", "fd23", "fd24", "fd52", "fd53", "fd54",
    ];

    /// Extract the short id from a full characteristic UUID string
    pub fn short_id(uuid: &str) -> Option<String> {
        let hex: String = uuid.chars().filter(|c| *c != '-').collect();
        if hex.len() == 32 {
            Some(hex[4..8].to_ascii_lowercase())
        } else if hex.len() == 4 {
            Some(hex.to_ascii_lowercase())
        } else {
            None
        }
    }
}

/// Advertisement data needed to recognise a peripheral
///
/// This is the subset of a BLE advertisement the recognition rules look at.
pub trait Advertisement {
    /// Platform identifier (hardware address or OS-assigned id)
    fn id(&self) -> &str;
    /// Advertised local name, if any
    fn local_name(&self) -> Option<&str>;
    /// Manufacturer payload: company id (little-endian) followed by data
    fn manufacturer_payload(&self) -> Option<&[u8]>;
}

/// Recognition data for a family of devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClass {
    /// Accepted advertised-name prefixes
    pub name_prefixes: Vec<String>,
    /// Accepted manufacturer payloads (exact match)
    pub manufacturer_payloads: Vec<Vec<u8>>,
}

impl Default for DeviceClass {
    fn default() -> Self {
        Self::minidrone()
    }
}

impl DeviceClass {
    /// Rolling Spider / Mambo family
    pub fn minidrone() -> Self {
        Self {
            name_prefixes: ["RS_", "Mars_", "Travis_", "Maclan_", "Mambo_"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            manufacturer_payloads: vec![
                vec![0x43, 0x00, 0xcf, 0x19, 0x00, 0x09, 0x01, 0x00],
                vec![0x43, 0x00, 0xcf, 0x19, 0x09, 0x09, 0x01, 0x00],
                vec![0x43, 0x00, 0xcf, 0x19, 0x07, 0x09, 0x01, 0x00],
            ],
        }
    }

    /// True for EITHER a matching name prefix OR a matching manufacturer payload
    pub fn recognizes<A: Advertisement + ?Sized>(&self, adv: &A) -> bool {
        let name_match = adv
            .local_name()
            .map(|name| self.name_prefixes.iter().any(|p| name.starts_with(p.as_str())))
            .unwrap_or(false);

        let manufacturer_match = adv
            .manufacturer_payload()
            .map(|payload| self.manufacturer_payloads.iter().any(|m| m.as_slice() == payload))
            .unwrap_or(false);

        name_match || manufacturer_match
    }
}
