//! The link task: one per ready session
//!
//! All mutable session state lives here and is only touched from this
//! task's `select!` loop, one tick, request or notification at a time.

use crate::error::{Result, SessionError};
use crate::session::commands::{Command, Completion, Outbound};
use crate::session::drive::DriveState;
use crate::session::events::{SessionEvent, SessionStatus};
use crate::transport::{BleTransport, LinkHandle, NotificationStream};
use bytes::Bytes;
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use spiderlink_shared::{
    characteristics, codec, Channel, ChannelSequencer, FlightState, LinkEvent, LinkState,
    LinkStateMachine, TransitionResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Requests from the session handle to its link task
pub(crate) enum LinkRequest {
    Execute {
        command: Command,
        reply: oneshot::Sender<Result<Completion>>,
    },
    StartDriveLoop {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A notification tagged with the channel it arrived on
#[derive(Debug)]
pub(crate) enum Notification {
    Data { channel: &'static str, data: Bytes },
    Closed { channel: &'static str },
}

/// All subscribed notification streams merged into one
pub(crate) type NotificationFeed = SelectAll<BoxStream<'static, Notification>>;

/// Add `stream` to `feed`; a `Closed` marker follows its last item
pub(crate) fn attach(feed: &mut NotificationFeed, channel: &'static str, stream: NotificationStream) {
    let tagged = stream
        .map(move |data| Notification::Data { channel, data })
        .chain(stream::once(async move { Notification::Closed { channel } }));
    feed.push(tagged.boxed());
}

/// Drive `machine` with `event` and publish the resulting link state
pub(crate) fn apply_link_event(
    machine: &mut LinkStateMachine,
    status: &watch::Sender<SessionStatus>,
    event: LinkEvent,
) -> LinkState {
    match machine.process_event(event) {
        TransitionResult::Success(state) => {
            status.send_modify(|s| s.link = state);
            state
        }
        TransitionResult::Invalid { from, event } => {
            warn!("[SESSION] Ignoring {:?} while {}", event, from);
            from
        }
    }
}

pub(crate) struct LinkTask {
    pub transport: Arc<dyn BleTransport>,
    pub handle: LinkHandle,
    pub machine: LinkStateMachine,
    pub sequencer: ChannelSequencer,
    pub status: Arc<watch::Sender<SessionStatus>>,
    pub events: broadcast::Sender<SessionEvent>,
    pub low_battery_percent: u8,
    pub drive: DriveState,
    pub flight: FlightState,
    pub battery: u8,
    pub ticking: bool,
}

impl LinkTask {
    pub(crate) async fn run(
        mut self,
        mut requests: mpsc::Receiver<LinkRequest>,
        mut notifications: NotificationFeed,
        tick_interval: Duration,
    ) {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.ticking => {
                    self.tick().await;
                }

                request = requests.recv() => match request {
                    Some(LinkRequest::Execute { command, reply }) => {
                        let _ = reply.send(self.execute(command).await);
                    }
                    Some(LinkRequest::StartDriveLoop { reply }) => {
                        if !self.ticking {
                            info!("[SESSION] {} drive loop started", self.handle.peripheral_id);
                            ticker.reset();
                            self.ticking = true;
                        }
                        let _ = reply.send(Ok(()));
                    }
                    Some(LinkRequest::Shutdown { reply }) => {
                        let _ = reply.send(self.shutdown("disconnect requested").await);
                        return;
                    }
                    None => {
                        // session handle dropped
                        let _ = self.shutdown("session dropped").await;
                        return;
                    }
                },

                Some(notification) = notifications.next() => {
                    if let Err(reason) = self.on_notification(notification) {
                        self.link_lost(reason);
                        return;
                    }
                }
            }
        }
    }

    /// One drive-loop iteration: always transmit, then account for the tick
    async fn tick(&mut self) {
        let seq = self.sequencer.next(Channel::Drive);
        let active = self.drive.is_active();
        let frame = codec::encode_setpoint(seq, &self.drive.setpoint(), active);
        trace!("[SESSION] tick seq={} active={}", seq, active);

        if let Err(e) = self
            .transport
            .write(&self.handle, characteristics::DRIVE, &frame, false)
            .await
        {
            warn!("[SESSION] Drive frame {} to {} failed: {}", seq, self.handle.peripheral_id, e);
        }

        if let Some(finished) = self.drive.advance() {
            debug!("[SESSION] Maneuver complete: {:?}", finished);
            self.emit(SessionEvent::ManeuverComplete(finished));
        }
        self.publish_drive();
    }

    async fn execute(&mut self, command: Command) -> Result<Completion> {
        let outbound = match command.prepare(self.flight, &mut self.sequencer) {
            Ok(outbound) => outbound,
            Err(reason) => {
                debug!("[SESSION] {:?} skipped: {}", command, reason);
                return Ok(Completion::Skipped(reason));
            }
        };

        match outbound {
            Outbound::Maneuver { setpoint, steps } => {
                if let Err(reason) = self.drive.request(setpoint, steps) {
                    debug!("[SESSION] {:?} skipped: {}", command, reason);
                    return Ok(Completion::Skipped(reason));
                }
                if !self.ticking {
                    warn!("[SESSION] Maneuver queued but the drive loop is not running");
                }
                self.publish_drive();
                Ok(Completion::Sent)
            }
            Outbound::Hover => {
                if let Some(abandoned) = self.drive.cancel() {
                    debug!("[SESSION] Maneuver {:?} cancelled", abandoned);
                }
                self.publish_drive();
                Ok(Completion::Sent)
            }
            Outbound::Frame { channel, frame } => {
                debug!("[SESSION] {:?} -> {} seq={}", command, channel, frame[1]);
                self.transport
                    .write(&self.handle, channel.characteristic(), &frame, false)
                    .await?;
                Ok(Completion::Sent)
            }
        }
    }

    /// Interpret a notification; `Err` means the link is gone
    fn on_notification(&mut self, notification: Notification) -> std::result::Result<(), String> {
        let (channel, data) = match notification {
            Notification::Data { channel, data } => (channel, data),
            Notification::Closed { channel } => {
                if channel == characteristics::BATTERY || channel == characteristics::FLIGHT_STATUS {
                    return Err(format!("notifications on {} ended", channel));
                }
                debug!("[SESSION] Auxiliary channel {} closed", channel);
                return Ok(());
            }
        };

        match channel {
            characteristics::BATTERY => match codec::decode_battery(&data) {
                Ok(percent) => self.on_battery(percent),
                Err(e) => warn!("[SESSION] Bad battery notification {:02x?}: {}", &data[..], e),
            },
            characteristics::FLIGHT_STATUS => {
                if !codec::is_flying_state_event(&data) {
                    trace!("[SESSION] Flight-status channel: {:02x?}", &data[..]);
                    return Ok(());
                }
                match codec::decode_flight_status(&data) {
                    Ok(code) => self.on_flight_status(code),
                    Err(e) => warn!("[SESSION] Bad flight-status notification: {}", e),
                }
            }
            _ => trace!("[SESSION] {} notification: {:02x?}", channel, &data[..]),
        }
        Ok(())
    }

    fn on_battery(&mut self, percent: u8) {
        let previous = self.battery;
        self.battery = percent;
        self.status.send_modify(|s| s.battery = percent);
        debug!("[SESSION] Battery {}%", percent);
        self.emit(SessionEvent::Battery(percent));

        if percent <= self.low_battery_percent && previous > self.low_battery_percent {
            warn!("[SESSION] {} battery low: {}%", self.handle.peripheral_id, percent);
            self.emit(SessionEvent::LowBattery(percent));
        }
    }

    fn on_flight_status(&mut self, code: u8) {
        let Some(state) = FlightState::from_status_code(code) else {
            debug!("[SESSION] Unknown flying state {}", code);
            return;
        };
        if state == self.flight {
            return;
        }
        let from = self.flight;
        self.flight = state;
        self.status.send_modify(|s| s.flight = state);
        info!("[SESSION] {} flight state {:?} -> {:?}", self.handle.peripheral_id, from, state);
        self.emit(SessionEvent::FlightStateChanged { from, to: state });
    }

    async fn shutdown(&mut self, reason: &str) -> Result<()> {
        self.ticking = false;
        apply_link_event(&mut self.machine, &self.status, LinkEvent::DisconnectRequested);
        let result = self.transport.disconnect(&self.handle).await;
        apply_link_event(&mut self.machine, &self.status, LinkEvent::DisconnectComplete);

        info!("[SESSION] Disconnected from {} ({})", self.handle.peripheral_id, reason);
        self.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });
        result.map_err(SessionError::from)
    }

    fn link_lost(&mut self, reason: String) {
        self.ticking = false;
        apply_link_event(&mut self.machine, &self.status, LinkEvent::LinkLost);
        warn!("[SESSION] Link to {} lost: {}", self.handle.peripheral_id, reason);
        self.emit(SessionEvent::Disconnected { reason });
    }

    fn publish_drive(&self) {
        let setpoint = self.drive.setpoint();
        let pending = self.drive.pending_ticks();
        self.status.send_if_modified(|s| {
            let changed = s.setpoint != setpoint || s.pending_ticks != pending;
            s.setpoint = setpoint;
            s.pending_ticks = pending;
            changed
        });
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
