//! Error types for sessions and swarms
//!
//! Transport failures are carried as opaque `anyhow::Error`s. Policy
//! rejections (guarded no-ops, invalid speed, drive while a maneuver is in
//! flight) are not errors at all; see [`crate::session::Completion`].

use spiderlink_shared::LinkState;
use thiserror::Error;

/// Errors surfaced by a [`crate::session::Session`]
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is not ready (link is {0})")]
    NotReady(LinkState),

    #[error("Session already used; create a new session to reconnect")]
    AlreadyUsed,

    #[error("Not connected to device")]
    NotConnected,

    #[error("Device does not expose characteristic {0}")]
    MissingCharacteristic(String),

    #[error("Characteristic {0} is not writable")]
    NotWritable(String),

    #[error("Link task has stopped")]
    LinkClosed,

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

/// Errors surfaced by a [`crate::swarm::Swarm`]
#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Swarm already assembled")]
    AlreadyAssembled,

    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
