//! Swarm membership: rosters and the enrollment window

use crate::error::SessionError;
use crate::session::{Identity, Session, SessionConfig};
use crate::transport::{BleTransport, PeripheralRecord};
use spiderlink_shared::{timing, DeviceClass};
use std::sync::Arc;
use std::time::Duration;

/// Which peripherals a swarm admits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Roster {
    /// Any peripheral recognised as the device class; closes on deadline only
    #[default]
    Open,
    /// Exactly these ids or advertised names
    Closed(Vec<String>),
}

impl Roster {
    /// Parse a comma-separated list; blank input yields an open roster
    pub fn parse(list: &str) -> Self {
        let entries: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(String::from)
            .collect();
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<String>) -> Self {
        if entries.is_empty() {
            Roster::Open
        } else {
            Roster::Closed(entries)
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Roster::Open)
    }

    /// Membership filter for one advertisement
    pub fn admits(&self, record: &PeripheralRecord, class: &DeviceClass) -> bool {
        match self {
            Roster::Open => class.recognizes(record),
            Roster::Closed(entries) => entries.iter().any(|entry| record.matches(entry)),
        }
    }
}

/// Configuration for a swarm
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub roster: Roster,
    /// Enrollment closes after this long regardless of who has joined
    pub enrollment_timeout: Duration,
    /// Recognition data for open rosters
    pub device_class: DeviceClass,
    /// Template for every member session
    pub session: SessionConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            roster: Roster::Open,
            enrollment_timeout: Duration::from_secs(timing::ENROLLMENT_TIMEOUT_SECS),
            device_class: DeviceClass::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Why enrollment closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    /// Every roster entry enrolled before the deadline
    RosterComplete,
    /// The enrollment window elapsed
    Deadline,
}

/// Outcome of [`crate::swarm::Swarm::assemble`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    /// Peripheral ids of the enrolled members
    pub enrolled: Vec<String>,
    pub closed_by: ClosedBy,
}

/// Connect one admitted peripheral, handing back the record either way
pub(crate) async fn enroll(
    transport: Arc<dyn BleTransport>,
    template: SessionConfig,
    record: PeripheralRecord,
) -> (PeripheralRecord, Result<Session, SessionError>) {
    let config = SessionConfig {
        identity: Identity::Device(record.id.clone()),
        ..template
    };
    let mut session = Session::new(transport, config);
    let result = session.connect_peripheral(record.clone()).await;
    (record, result.map(|()| session))
}
