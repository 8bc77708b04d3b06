//! SpiderLink: BLE control-plane client for minidrone quadcopters
//!
//! A [`Session`] owns one drone: it connects, performs the handshake, keeps
//! the drone fed with setpoints from a fixed-rate drive loop and tracks the
//! battery and flying state the drone reports. A [`Swarm`] enrolls many
//! drones within a bounded window and fans commands out to all of them.
//!
//! Both implement [`Pilot`], which provides the named flight operations.

pub mod error;
pub mod session;
pub mod swarm;
pub mod transport;

pub use error::{SessionError, SwarmError};
pub use session::{
    Command, Completion, Direction, Identity, Maneuver, Pilot, Session, SessionConfig,
    SessionEvent, SessionStatus, SkipReason,
};
pub use swarm::{AssemblyReport, BroadcastReport, ClosedBy, Roster, Swarm, SwarmConfig, SwarmEvent};
pub use transport::{BleTransport, BluetoothTransport, PeripheralRecord, SimulatedTransport};

pub use spiderlink_shared::{FlightState, FlipDirection, LinkState, Setpoint};
