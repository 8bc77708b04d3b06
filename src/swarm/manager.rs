//! Swarm coordinator: enrollment barrier, broadcast fan-out, release

use crate::error::SwarmError;
use crate::session::{Command, Completion, Pilot, Session};
use crate::swarm::enrollment::{self, AssemblyReport, ClosedBy, Roster, SwarmConfig};
use crate::transport::{BleTransport, PeripheralRecord};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events emitted by a swarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    /// A peripheral completed its handshake and joined
    MemberEnrolled { id: String, name: Option<String> },
    /// A connect attempt failed; the peripheral may be retried while the window is open
    EnrollmentFailed { id: String, reason: String },
    /// Enrollment closed; fires exactly once
    Assembled(AssemblyReport),
    /// Every member has been disconnected
    Released,
}

/// Aggregate outcome of a broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members whose command completed, guarded no-ops included
    pub completed: usize,
    /// Members whose command returned an error
    pub failed: usize,
}

impl BroadcastReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed
    }
}

/// A group of drones controlled as one
pub struct Swarm {
    transport: Arc<dyn BleTransport>,
    config: SwarmConfig,
    members: BTreeMap<String, Session>,
    assembled: bool,
    events: broadcast::Sender<SwarmEvent>,
}

impl Swarm {
    pub fn new(transport: Arc<dyn BleTransport>, config: SwarmConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            transport,
            config,
            members: BTreeMap::new(),
            assembled: false,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.events.subscribe()
    }

    /// Discover and enroll members until the roster is complete or the
    /// enrollment window closes
    ///
    /// Membership is frozen afterwards; a swarm assembles once.
    pub async fn assemble(&mut self) -> Result<AssemblyReport, SwarmError> {
        if self.assembled {
            return Err(SwarmError::AlreadyAssembled);
        }
        self.assembled = true;

        let mut discovery = self.transport.discover().await?;
        let deadline = tokio::time::sleep(self.config.enrollment_timeout);
        tokio::pin!(deadline);

        let mut attempts = FuturesUnordered::new();
        // peripherals enrolled or with an attempt in flight
        let mut claimed: HashSet<String> = HashSet::new();
        let mut outstanding: Vec<String> = match &self.config.roster {
            Roster::Open => Vec::new(),
            Roster::Closed(entries) => entries.clone(),
        };

        info!(
            "[SWARM] Enrollment open for {:?} ({} roster entries)",
            self.config.enrollment_timeout,
            outstanding.len()
        );

        let closed_by = loop {
            if !self.config.roster.is_open() && outstanding.is_empty() {
                break ClosedBy::RosterComplete;
            }

            tokio::select! {
                _ = &mut deadline => break ClosedBy::Deadline,

                Some(record) = discovery.next() => {
                    if claimed.contains(&record.id)
                        || !self.config.roster.admits(&record, &self.config.device_class)
                    {
                        continue;
                    }
                    info!("[SWARM] Enrolling {} ({})", record.label(), record.id);
                    claimed.insert(record.id.clone());
                    attempts.push(enrollment::enroll(
                        self.transport.clone(),
                        self.config.session.clone(),
                        record,
                    ));
                }

                Some((record, result)) = attempts.next(), if !attempts.is_empty() => {
                    match result {
                        Ok(session) => self.admit(record, session, &mut outstanding),
                        Err(e) => {
                            warn!("[SWARM] Enrollment of {} failed: {}", record.label(), e);
                            claimed.remove(&record.id);
                            self.emit(SwarmEvent::EnrollmentFailed {
                                id: record.id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        };

        if !attempts.is_empty() {
            debug!("[SWARM] Abandoning {} enrollment attempts", attempts.len());
        }
        drop(attempts);
        drop(discovery);

        self.prepare_members().await;

        let report = AssemblyReport {
            enrolled: self.members.keys().cloned().collect(),
            closed_by,
        };
        info!(
            "[SWARM] Assembled {} members ({:?})",
            report.enrolled.len(),
            report.closed_by
        );
        self.emit(SwarmEvent::Assembled(report.clone()));
        Ok(report)
    }

    fn admit(&mut self, record: PeripheralRecord, session: Session, outstanding: &mut Vec<String>) {
        outstanding.retain(|entry| !record.matches(entry));
        info!(
            "[SWARM] {} enrolled ({} members)",
            record.label(),
            self.members.len() + 1
        );
        self.emit(SwarmEvent::MemberEnrolled {
            id: record.id.clone(),
            name: record.name.clone(),
        });
        self.members.insert(record.id, session);
    }

    /// Flat trim every member and start its drive loop
    async fn prepare_members(&self) {
        join_all(self.members.iter().map(|(id, session)| async move {
            if let Err(e) = session.flat_trim().await {
                warn!("[SWARM] Flat trim of {} failed: {}", id, e);
            }
            if let Err(e) = session.start_drive_loop().await {
                warn!("[SWARM] Drive loop of {} failed to start: {}", id, e);
            }
        }))
        .await;
    }

    /// Run `command` on every member concurrently
    ///
    /// Member failures are counted, never propagated; completes at once
    /// when there are no members.
    pub async fn broadcast(&self, command: Command) -> BroadcastReport {
        let outcomes = join_all(self.members.iter().map(|(id, session)| async move {
            (id, session.execute(command).await)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Completion::Sent) => report.completed += 1,
                Ok(Completion::Skipped(reason)) => {
                    debug!("[SWARM] {:?} skipped on {}: {}", command, id, reason);
                    report.completed += 1;
                }
                Err(e) => {
                    warn!("[SWARM] {:?} failed on {}: {}", command, id, e);
                    report.failed += 1;
                }
            }
        }
        debug!("[SWARM] {:?} done: {:?}", command, report);
        report
    }

    /// Disconnect every member concurrently and forget them
    pub async fn release(&mut self) {
        let results = join_all(
            self.members
                .iter_mut()
                .map(|(id, session)| async move { (id.clone(), session.disconnect().await) }),
        )
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                warn!("[SWARM] Disconnect of {} failed: {}", id, e);
            }
        }
        info!("[SWARM] Released {} members", self.members.len());
        self.members.clear();
        self.emit(SwarmEvent::Released);
    }

    /// Look a member up by peripheral id or advertised name
    pub fn member(&self, id_or_name: &str) -> Option<&Session> {
        self.members.get(id_or_name).or_else(|| {
            self.members
                .values()
                .find(|session| session.status().name.as_deref() == Some(id_or_name))
        })
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &Session)> {
        self.members.iter().map(|(id, session)| (id.as_str(), session))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn emit(&self, event: SwarmEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Pilot for Swarm {
    type Output = BroadcastReport;

    async fn execute(&self, command: Command) -> BroadcastReport {
        self.broadcast(command).await
    }
}
