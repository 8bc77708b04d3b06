//! Per-drone session: handshake, sequencing, drive loop and flight commands

mod commands;
mod config;
mod connection;
mod drive;
mod events;
mod link;
mod pilot;

pub use commands::{Command, Completion, Direction, Maneuver, SkipReason};
pub use config::{Identity, SessionConfig};
pub use connection::Session;
pub use drive::DriveState;
pub use events::{SessionEvent, SessionStatus};
pub use pilot::Pilot;
