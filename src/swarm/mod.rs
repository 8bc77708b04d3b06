//! Many sessions controlled as one

mod enrollment;
mod manager;

pub use enrollment::{AssemblyReport, ClosedBy, Roster, SwarmConfig};
pub use manager::{BroadcastReport, Swarm, SwarmEvent};
