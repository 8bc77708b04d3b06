//! Session handle: discovery, connect, handshake and the public command API

use crate::error::{Result, SessionError};
use crate::session::commands::{Command, Completion};
use crate::session::config::SessionConfig;
use crate::session::drive::DriveState;
use crate::session::events::{SessionEvent, SessionStatus};
use crate::session::link::{self, LinkRequest, LinkTask, NotificationFeed};
use crate::session::pilot::Pilot;
use crate::transport::{BleTransport, LinkHandle, PeripheralRecord};
use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use spiderlink_shared::{
    characteristics, codec, Channel, ChannelSequencer, FlightState, LinkEvent, LinkState,
    LinkStateMachine,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Channels that must exist for a peripheral to be usable
const REQUIRED_CHANNELS: [&str; 5] = [
    characteristics::DRIVE,
    characteristics::COMMAND,
    characteristics::EMERGENCY,
    characteristics::BATTERY,
    characteristics::FLIGHT_STATUS,
];

/// Channels frames are written to
const WRITABLE_CHANNELS: [&str; 3] = [
    characteristics::DRIVE,
    characteristics::COMMAND,
    characteristics::EMERGENCY,
];

/// A running link task and the way to reach it
struct LinkControl {
    handle: LinkHandle,
    requests: mpsc::Sender<LinkRequest>,
    task: JoinHandle<()>,
}

/// A connected link whose setup has not finished yet
///
/// Dropping it while still armed (setup abandoned mid-way) releases the
/// link in the background so no peripheral stays connected without an
/// owning session.
struct PendingLink {
    transport: Arc<dyn BleTransport>,
    handle: LinkHandle,
    armed: bool,
}

impl PendingLink {
    fn new(transport: Arc<dyn BleTransport>, handle: LinkHandle) -> Self {
        Self {
            transport,
            handle,
            armed: true,
        }
    }

    /// Hand the link over; dropping no longer disconnects
    fn disarm(mut self) -> LinkHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for PendingLink {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("[SESSION] Setup of {} abandoned outside a runtime", self.handle.peripheral_id);
            return;
        };
        debug!("[SESSION] Setup of {} abandoned, releasing link", self.handle.peripheral_id);
        let transport = self.transport.clone();
        let handle = self.handle.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.disconnect(&handle).await {
                debug!("[SESSION] Release of {} failed: {}", handle.peripheral_id, e);
            }
        });
    }
}

/// Control of one drone over one BLE link
///
/// A session is single-use: once a connect attempt has been made, a new
/// session is needed to reconnect, since sequence counters and flight state
/// cannot be trusted to survive a lost link.
pub struct Session {
    transport: Arc<dyn BleTransport>,
    config: SessionConfig,
    machine: LinkStateMachine,
    status: Arc<watch::Sender<SessionStatus>>,
    events: broadcast::Sender<SessionEvent>,
    link: Option<LinkControl>,
    used: bool,
}

impl Session {
    pub fn new(transport: Arc<dyn BleTransport>, config: SessionConfig) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (events, _) = broadcast::channel(64);
        Self {
            transport,
            config,
            machine: LinkStateMachine::new(),
            status: Arc::new(status),
            events,
            link: None,
            used: false,
        }
    }

    /// Current snapshot of link, flight and drive state
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> LinkState {
        self.status.borrow().link
    }

    /// Receive future session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch status snapshots as they change
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Scan for a peripheral matching the configured identity and connect
    ///
    /// Connect failures are returned as-is; retrying is up to the caller.
    pub async fn connect(&mut self) -> Result<()> {
        self.claim()?;
        self.advance(LinkEvent::ScanStarted);
        info!("[SESSION] Scanning for {}", self.config.identity);

        let mut discovery = match self.transport.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                self.advance(LinkEvent::ConnectFailed);
                return Err(e.into());
            }
        };

        let record = loop {
            match discovery.next().await {
                Some(record) if self.config.identity.accepts(&record, &self.config.device_class) => {
                    break record;
                }
                Some(record) => trace!("[SESSION] Ignoring {}", record.label()),
                None => {
                    self.advance(LinkEvent::ConnectFailed);
                    return Err(anyhow!("Discovery ended without a match for {}", self.config.identity).into());
                }
            }
        };
        drop(discovery);

        info!("[SESSION] Found {} ({})", record.label(), record.id);
        self.advance(LinkEvent::PeripheralMatched);
        self.establish(record).await
    }

    /// Connect to an already discovered peripheral, skipping the scan
    pub async fn connect_peripheral(&mut self, record: PeripheralRecord) -> Result<()> {
        self.claim()?;
        self.advance(LinkEvent::PeripheralMatched);
        self.establish(record).await
    }

    /// Start the fixed-rate drive loop; idempotent
    pub async fn start_drive_loop(&self) -> Result<()> {
        self.request(|reply| LinkRequest::StartDriveLoop { reply }).await
    }

    /// Stop the drive loop and tear the link down
    ///
    /// A no-op when there is no link (never connected, or already lost).
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(control) = self.link.take() else {
            return Ok(());
        };

        let (reply, rx) = oneshot::channel();
        let result = match control.requests.send(LinkRequest::Shutdown { reply }).await {
            Ok(()) => rx.await.unwrap_or(Ok(())),
            // link task already gone: the link was lost
            Err(_) => Ok(()),
        };
        if let Err(e) = control.task.await {
            warn!("[SESSION] Link task for {} ended abnormally: {}", control.handle.peripheral_id, e);
        }
        result
    }

    /// Signal strength of the live link
    pub async fn signal_strength(&self) -> Result<Option<i16>> {
        match &self.link {
            Some(control) if self.state() == LinkState::Ready => {
                Ok(self.transport.rssi(&control.handle).await?)
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Wait until the drone reports `target`
    ///
    /// Fails with `NotConnected` if the link goes away first.
    pub async fn wait_for_flight_state(&self, target: FlightState) -> Result<()> {
        let mut rx = self.watch();
        let reached = rx
            .wait_for(|s| s.flight == target || s.link != LinkState::Ready)
            .await
            .map_err(|_| SessionError::LinkClosed)?
            .flight
            == target;

        if reached {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    fn claim(&mut self) -> Result<()> {
        if self.used {
            return Err(SessionError::AlreadyUsed);
        }
        self.used = true;
        Ok(())
    }

    fn advance(&mut self, event: LinkEvent) -> LinkState {
        link::apply_link_event(&mut self.machine, &self.status, event)
    }

    async fn establish(&mut self, record: PeripheralRecord) -> Result<()> {
        self.status.send_modify(|s| {
            s.id = Some(record.id.clone());
            s.name = record.name.clone();
        });

        let handle = match self.transport.connect(&record).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[SESSION] Connect to {} failed: {}", record.label(), e);
                self.advance(LinkEvent::ConnectFailed);
                return Err(e.into());
            }
        };
        let pending = PendingLink::new(self.transport.clone(), handle);
        self.advance(LinkEvent::TransportConnected);

        let (feed, sequencer) = match self.handshake(&pending.handle).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("[SESSION] Setup of {} failed: {}", record.label(), e);
                if let Err(e) = self.transport.disconnect(&pending.handle).await {
                    debug!("[SESSION] Cleanup disconnect failed: {}", e);
                }
                pending.disarm();
                self.advance(LinkEvent::ConnectFailed);
                return Err(e);
            }
        };
        let handle = pending.disarm();
        self.advance(LinkEvent::HandshakeAcknowledged);

        let (requests, rx) = mpsc::channel(32);
        let task = LinkTask {
            transport: self.transport.clone(),
            handle: handle.clone(),
            machine: std::mem::take(&mut self.machine),
            sequencer,
            status: self.status.clone(),
            events: self.events.clone(),
            low_battery_percent: self.config.low_battery_percent,
            drive: DriveState::new(),
            flight: FlightState::Landed,
            battery: 100,
            ticking: false,
        };
        let task = tokio::spawn(task.run(rx, feed, self.config.tick_interval));
        self.link = Some(LinkControl {
            handle,
            requests,
            task,
        });

        info!("[SESSION] {} ready", record.label());
        let _ = self.events.send(SessionEvent::Ready);
        Ok(())
    }

    /// Enumerate, subscribe, and exchange the handshake
    async fn handshake(&self, handle: &LinkHandle) -> Result<(NotificationFeed, ChannelSequencer)> {
        let available = self.transport.enumerate_characteristics(handle).await?;
        let notifying: HashSet<&str> = available
            .iter()
            .filter(|c| c.capabilities.notify)
            .map(|c| c.channel.as_str())
            .collect();
        let present: HashSet<&str> = available.iter().map(|c| c.channel.as_str()).collect();
        if let Some(missing) = REQUIRED_CHANNELS.iter().find(|c| !present.contains(**c)) {
            return Err(SessionError::MissingCharacteristic(missing.to_string()));
        }
        let writable: HashSet<&str> = available
            .iter()
            .filter(|c| c.capabilities.write || c.capabilities.write_without_response)
            .map(|c| c.channel.as_str())
            .collect();
        if let Some(channel) = WRITABLE_CHANNELS.iter().find(|c| !writable.contains(**c)) {
            return Err(SessionError::NotWritable(channel.to_string()));
        }

        let mut feed = NotificationFeed::new();
        for channel in [characteristics::BATTERY, characteristics::FLIGHT_STATUS] {
            let stream = self.transport.subscribe(handle, channel).await?;
            link::attach(&mut feed, channel, stream);
        }
        for channel in characteristics::AUXILIARY {
            if !notifying.contains(channel) {
                continue;
            }
            match self.transport.subscribe(handle, channel).await {
                Ok(stream) => link::attach(&mut feed, channel, stream),
                Err(e) => debug!("[SESSION] Auxiliary channel {} unavailable: {}", channel, e),
            }
        }

        tokio::time::sleep(self.config.settle_delay).await;

        let mut sequencer = ChannelSequencer::new();
        let seq = sequencer.next(Channel::Command);
        let frame = codec::encode_handshake(seq);
        self.transport
            .write(handle, characteristics::COMMAND, &frame, true)
            .await?;
        debug!("[SESSION] Handshake acknowledged");

        tokio::time::sleep(self.config.settle_delay).await;
        Ok((feed, sequencer))
    }

    /// Send a request to the link task, rejecting it unless the link is ready
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> LinkRequest,
    ) -> Result<T> {
        let state = self.state();
        let control = match &self.link {
            Some(control) if state == LinkState::Ready => control,
            _ => {
                warn!("[SESSION] Rejecting request: link is {}", state);
                return Err(SessionError::NotReady(state));
            }
        };

        let (reply, rx) = oneshot::channel();
        control
            .requests
            .send(make(reply))
            .await
            .map_err(|_| SessionError::LinkClosed)?;
        rx.await.map_err(|_| SessionError::LinkClosed)?
    }
}

#[async_trait]
impl Pilot for Session {
    type Output = Result<Completion>;

    /// Run one command on this drone
    ///
    /// Rejected with `NotReady` before the handshake completes.
    async fn execute(&self, command: Command) -> Result<Completion> {
        self.request(|reply| LinkRequest::Execute { command, reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::commands::{Maneuver, SkipReason};
    use crate::session::config::Identity;
    use crate::transport::SimulatedTransport;
    use spiderlink_shared::Setpoint;
    use std::time::Duration;
    use tokio::time::timeout;

    const DRONE: &str = "e0:14:00:00:00:01";

    fn fast_config() -> SessionConfig {
        SessionConfig {
            tick_interval: Duration::from_millis(10),
            settle_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    async fn simulated(firmware: bool) -> Arc<SimulatedTransport> {
        let sim = if firmware {
            SimulatedTransport::new().with_firmware(87)
        } else {
            SimulatedTransport::new()
        };
        sim.advertise(PeripheralRecord::new("aa:bb:cc:dd:ee:ff").with_name("Speaker"))
            .await;
        sim.advertise(PeripheralRecord::new(DRONE).with_name("RS_R123456"))
            .await;
        Arc::new(sim)
    }

    async fn ready_session(sim: &Arc<SimulatedTransport>) -> Session {
        let mut session = Session::new(sim.clone(), fast_config());
        timeout(Duration::from_secs(2), session.connect())
            .await
            .expect("connect timed out")
            .expect("connect failed");
        session
    }

    #[tokio::test]
    async fn test_connect_handshake_take_off_land() {
        let sim = simulated(true).await;
        let session = ready_session(&sim).await;
        assert_eq!(session.state(), LinkState::Ready);
        assert_eq!(session.status().name.as_deref(), Some("RS_R123456"));

        let commands = sim.writes_to(DRONE, characteristics::COMMAND).await;
        assert_eq!(commands.len(), 1);
        assert_eq!(&commands[0][6..16], b"2014-10-28");
        let handshake_seq = commands[0][1];

        assert_eq!(session.take_off().await.unwrap(), Completion::Sent);
        timeout(Duration::from_secs(1), session.wait_for_flight_state(FlightState::Hovering))
            .await
            .expect("never hovered")
            .unwrap();

        assert_eq!(session.land().await.unwrap(), Completion::Sent);

        let commands = sim.writes_to(DRONE, characteristics::COMMAND).await;
        assert_eq!(commands.len(), 3);
        let seq = handshake_seq.wrapping_add(1);
        assert_eq!(&commands[1][..], &[0x02, seq, 0x02, 0x00, 0x01, 0x00]);
        assert_eq!(&commands[2][..], &[0x02, seq.wrapping_add(1), 0x02, 0x00, 0x03, 0x00]);
    }

    #[tokio::test]
    async fn test_handshake_is_acknowledged_write() {
        let sim = simulated(false).await;
        let _session = ready_session(&sim).await;

        let writes = sim.writes().await;
        assert_eq!(writes.len(), 1);
        assert!(writes[0].with_ack);
        assert_eq!(writes[0].data[0], codec::MARKER_HANDSHAKE);
    }

    #[tokio::test]
    async fn test_take_off_while_hovering_is_skipped() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        sim.report_flight_state(DRONE, FlightState::Hovering).await;
        timeout(Duration::from_secs(1), session.wait_for_flight_state(FlightState::Hovering))
            .await
            .unwrap()
            .unwrap();

        let before = sim.writes_to(DRONE, characteristics::COMMAND).await.len();
        assert_eq!(
            session.take_off().await.unwrap(),
            Completion::Skipped(SkipReason::AlreadyAirborne)
        );
        assert_eq!(sim.writes_to(DRONE, characteristics::COMMAND).await.len(), before);
    }

    #[tokio::test]
    async fn test_commands_before_ready_are_rejected() {
        let sim = simulated(false).await;
        let session = Session::new(sim.clone(), fast_config());

        assert!(matches!(
            session.take_off().await,
            Err(SessionError::NotReady(LinkState::Disconnected))
        ));
        assert!(matches!(session.start_drive_loop().await, Err(SessionError::NotReady(_))));
        assert!(matches!(session.signal_strength().await, Err(SessionError::NotConnected)));
        assert!(sim.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_session_is_single_use() {
        let sim = simulated(false).await;
        let mut session = ready_session(&sim).await;
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), LinkState::Disconnected);
        assert_eq!(sim.disconnects().await, vec![DRONE.to_string()]);

        assert!(matches!(session.connect().await, Err(SessionError::AlreadyUsed)));
        assert!(matches!(
            session.connect_peripheral(PeripheralRecord::new(DRONE)).await,
            Err(SessionError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let sim = simulated(false).await;
        sim.fail_connect(DRONE).await;
        let mut session = Session::new(sim.clone(), fast_config());

        let result = session.connect().await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert_eq!(session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_drive_loop_ticks_and_completes_maneuver() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        let mut events = session.subscribe();

        session.start_drive_loop().await.unwrap();
        let completion = session.forward(Maneuver::new(40, 3)).await.unwrap();
        assert_eq!(completion, Completion::Sent);

        // a second request while the first is held is ignored
        assert_eq!(
            session.up(Maneuver::new(40, 3)).await.unwrap(),
            Completion::Skipped(SkipReason::ManeuverInProgress)
        );

        let finished = timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(SessionEvent::ManeuverComplete(sp)) = events.recv().await {
                    return sp;
                }
            }
        })
        .await
        .expect("maneuver never completed");
        assert_eq!(finished, Setpoint::new(0, 40, 0, 0));

        let status = session.status();
        assert_eq!(status.setpoint, Setpoint::NEUTRAL);
        assert_eq!(status.pending_ticks, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let drive = sim.writes_to(DRONE, characteristics::DRIVE).await;
        let active: Vec<_> = drive.iter().filter(|f| f[6] == 1).collect();
        assert_eq!(active.len(), 3);
        assert!(drive.len() > active.len());

        // drive sequence numbers are contiguous from zero
        for (i, frame) in drive.iter().enumerate() {
            assert_eq!(frame[1], i as u8);
        }
    }

    #[tokio::test]
    async fn test_invalid_speed_sends_nothing() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        assert_eq!(
            session.tilt_left(Maneuver::new(150, 10)).await.unwrap(),
            Completion::Skipped(SkipReason::InvalidSpeed(150))
        );
        assert_eq!(session.status().pending_ticks, 0);
    }

    #[tokio::test]
    async fn test_battery_events() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        let mut events = session.subscribe();

        sim.report_battery(DRONE, 35).await;
        sim.report_battery(DRONE, 18).await;

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::Battery(35),
                SessionEvent::Battery(18),
                SessionEvent::LowBattery(18),
            ]
        );
        assert_eq!(session.status().battery, 18);
    }

    #[tokio::test]
    async fn test_link_loss_disconnects_session() {
        let sim = simulated(false).await;
        let mut session = ready_session(&sim).await;
        let mut events = session.subscribe();
        session.start_drive_loop().await.unwrap();

        sim.drop_link(DRONE).await;

        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert!(matches!(event, SessionEvent::Disconnected { .. }));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(matches!(session.land().await, Err(SessionError::NotReady(_))));

        // nothing left to tear down
        session.disconnect().await.unwrap();
        assert!(sim.disconnects().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_flight_code_leaves_state() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        let mut events = session.subscribe();

        sim.notify(DRONE, characteristics::FLIGHT_STATUS, codec::flying_state_notification(0, 9))
            .await;
        sim.report_flight_state(DRONE, FlightState::TakingOff).await;

        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            SessionEvent::FlightStateChanged {
                from: FlightState::Landed,
                to: FlightState::TakingOff,
            }
        );
    }

    #[tokio::test]
    async fn test_emergency_stop_ignores_flight_guards() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        assert_eq!(session.status().flight, FlightState::Landed);

        assert_eq!(session.emergency_stop().await.unwrap(), Completion::Sent);
        let frames = sim.writes_to(DRONE, characteristics::EMERGENCY).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0x02, 0x00, 0x02, 0x00, 0x04, 0x00]);
    }

    #[tokio::test]
    async fn test_toggle_takes_off_then_lands() {
        let sim = simulated(true).await;
        let session = ready_session(&sim).await;

        assert_eq!(session.toggle().await.unwrap(), Completion::Sent);
        timeout(Duration::from_secs(1), session.wait_for_flight_state(FlightState::Hovering))
            .await
            .expect("never hovered")
            .unwrap();

        assert_eq!(session.toggle().await.unwrap(), Completion::Sent);
        timeout(Duration::from_secs(1), session.wait_for_flight_state(FlightState::Landed))
            .await
            .expect("never landed")
            .unwrap();

        let commands = sim.writes_to(DRONE, characteristics::COMMAND).await;
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1][4], 0x01);
        assert_eq!(commands[2][4], 0x03);
    }

    #[tokio::test]
    async fn test_hover_cancels_running_maneuver() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        let mut status = session.watch();
        session.start_drive_loop().await.unwrap();

        session.forward(Maneuver::new(40, 1000)).await.unwrap();
        assert!(status.borrow_and_update().pending_ticks > 900);

        assert_eq!(session.hover().await.unwrap(), Completion::Sent);
        let snapshot = status.borrow_and_update().clone();
        assert_eq!(snapshot.setpoint, Setpoint::NEUTRAL);
        assert_eq!(snapshot.pending_ticks, 0);

        // the drive loop accepts a new maneuver right away
        assert_eq!(session.up(Maneuver::new(20, 2)).await.unwrap(), Completion::Sent);
    }

    #[tokio::test]
    async fn test_drive_axes_are_clamped_on_the_wire() {
        let sim = simulated(false).await;
        let session = ready_session(&sim).await;
        session.start_drive_loop().await.unwrap();

        let completion = session.drive(Setpoint::new(127, -128, 0, 0), 2).await.unwrap();
        assert_eq!(completion, Completion::Sent);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let drive = sim.writes_to(DRONE, characteristics::DRIVE).await;
        let active: Vec<_> = drive.iter().filter(|f| f[6] == 1).collect();
        assert_eq!(active.len(), 2);
        for frame in active {
            assert_eq!(i16::from_le_bytes([frame[7], frame[8]]), 100);
            assert_eq!(i16::from_le_bytes([frame[9], frame[10]]), -100);
        }
    }

    #[tokio::test]
    async fn test_read_only_channel_fails_setup() {
        let sim = simulated(false).await;
        sim.make_read_only(DRONE, characteristics::DRIVE).await;
        let mut session = Session::new(sim.clone(), fast_config());

        let result = session.connect().await;
        assert!(matches!(result, Err(SessionError::NotWritable(ref c)) if c == characteristics::DRIVE));
        assert_eq!(session.state(), LinkState::Disconnected);
        assert!(!sim.is_connected(DRONE).await);
        assert!(sim.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_setup_releases_link() {
        let sim = simulated(false).await;
        let config = SessionConfig {
            settle_delay: Duration::from_millis(200),
            ..fast_config()
        };
        let mut session = Session::new(sim.clone(), config);

        // give up while the session waits between subscribing and the handshake
        assert!(timeout(Duration::from_millis(50), session.connect()).await.is_err());

        timeout(Duration::from_secs(1), async {
            while sim.is_connected(DRONE).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("link never released");
        assert_eq!(sim.disconnects().await, vec![DRONE.to_string()]);
        assert!(sim.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_device_identity_skips_other_drones() {
        let sim = simulated(false).await;
        sim.advertise(PeripheralRecord::new("e0:14:00:00:00:02").with_name("Mambo_2"))
            .await;

        let config = SessionConfig {
            identity: Identity::Device("Mambo_2".into()),
            ..fast_config()
        };
        let mut session = Session::new(sim.clone(), config);
        timeout(Duration::from_secs(2), session.connect()).await.unwrap().unwrap();
        assert_eq!(session.status().id.as_deref(), Some("e0:14:00:00:00:02"));
        assert!(!sim.is_connected(DRONE).await);
    }
}
