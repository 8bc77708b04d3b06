//! Observable session state and events

use spiderlink_shared::{FlightState, LinkState, Setpoint};

/// Events emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake complete; commands are accepted from now on
    Ready,
    /// Battery report, in percent
    Battery(u8),
    /// Battery dropped to or below the configured threshold
    LowBattery(u8),
    /// Drone reported a new flying state
    FlightStateChanged { from: FlightState, to: FlightState },
    /// A drive maneuver ran its last tick
    ManeuverComplete(Setpoint),
    /// Link is gone, either requested or lost
    Disconnected { reason: String },
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Peripheral id once one has been matched
    pub id: Option<String>,
    /// Advertised name once one has been matched
    pub name: Option<String>,
    pub link: LinkState,
    pub flight: FlightState,
    /// Last reported battery level; 100 until the first report
    pub battery: u8,
    pub setpoint: Setpoint,
    pub pending_ticks: u32,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            link: LinkState::Disconnected,
            flight: FlightState::Landed,
            battery: 100,
            setpoint: Setpoint::NEUTRAL,
            pending_ticks: 0,
        }
    }
}

impl SessionStatus {
    /// Name if advertised, id otherwise
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("<unbound>")
    }
}
