//! In-process simulated BLE stack
//!
//! Stands in for BlueZ during development and in tests: it advertises a
//! configurable set of drones, records every frame written, lets callers
//! inject notifications or failures, and can run a tiny firmware model
//! that answers flight commands with flying-state notifications.

use crate::transport::traits::{
    BleTransport, Capabilities, CharacteristicInfo, DiscoveryStream, LinkHandle,
    NotificationStream, PeripheralRecord,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream;
use futures::StreamExt;
use spiderlink_shared::codec::{self, class, piloting};
use spiderlink_shared::{characteristics, FlightState};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A frame observed on the simulated air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub peripheral_id: String,
    pub channel: String,
    pub data: Bytes,
    pub with_ack: bool,
}

#[derive(Default)]
struct SimLink {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Bytes>>>,
}

#[derive(Default)]
struct SimState {
    advertised: Vec<(PeripheralRecord, Duration)>,
    links: HashMap<String, SimLink>,
    writes: Vec<WriteRecord>,
    disconnects: Vec<String>,
    failing_connects: HashSet<String>,
    failing_writes: HashSet<String>,
    /// (peripheral id, channel) pairs enumerated without write support
    read_only: HashSet<(String, String)>,
}

/// Simulated transport
pub struct SimulatedTransport {
    state: RwLock<SimState>,
    firmware: bool,
    battery_percent: u8,
    notify_seq: AtomicU8,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Create an empty simulated air with no firmware model
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SimState::default()),
            firmware: false,
            battery_percent: 100,
            notify_seq: AtomicU8::new(0),
        }
    }

    /// Enable the firmware model; it reports `battery_percent` after the
    /// handshake and answers takeoff/land/emergency with flying states
    pub fn with_firmware(mut self, battery_percent: u8) -> Self {
        self.firmware = true;
        self.battery_percent = battery_percent;
        self
    }

    /// Advertise a peripheral immediately on every scan
    pub async fn advertise(&self, record: PeripheralRecord) {
        self.advertise_after(record, Duration::ZERO).await;
    }

    /// Advertise a peripheral `delay` after the previous advertisement of a scan
    pub async fn advertise_after(&self, record: PeripheralRecord, delay: Duration) {
        self.state.write().await.advertised.push((record, delay));
    }

    /// Make connect attempts to `id` fail
    pub async fn fail_connect(&self, id: &str) {
        self.state.write().await.failing_connects.insert(id.to_string());
    }

    /// Make every write to `id` fail
    pub async fn fail_writes(&self, id: &str) {
        self.state.write().await.failing_writes.insert(id.to_string());
    }

    /// Enumerate `channel` on `id` without write support
    pub async fn make_read_only(&self, id: &str, channel: &str) {
        self.state
            .write()
            .await
            .read_only
            .insert((id.to_string(), channel.to_string()));
    }

    /// All frames written so far
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.read().await.writes.clone()
    }

    /// Frames written to one peripheral on one channel
    pub async fn writes_to(&self, id: &str, channel: &str) -> Vec<Bytes> {
        self.state
            .read()
            .await
            .writes
            .iter()
            .filter(|w| w.peripheral_id == id && w.channel == channel)
            .map(|w| w.data.clone())
            .collect()
    }

    /// Peripheral ids that were disconnected, in order
    pub async fn disconnects(&self) -> Vec<String> {
        self.state.read().await.disconnects.clone()
    }

    /// Whether `id` currently has a live link
    pub async fn is_connected(&self, id: &str) -> bool {
        self.state.read().await.links.contains_key(id)
    }

    /// Deliver a notification to every subscriber of `channel` on `id`
    pub async fn notify(&self, id: &str, channel: &str, data: Bytes) {
        let mut state = self.state.write().await;
        if let Some(link) = state.links.get_mut(id) {
            if let Some(subscribers) = link.subscribers.get_mut(channel) {
                subscribers.retain(|tx| tx.unbounded_send(data.clone()).is_ok());
            }
        }
    }

    /// Report a flying state from `id`
    pub async fn report_flight_state(&self, id: &str, state: FlightState) {
        let seq = self.notify_seq.fetch_add(1, Ordering::SeqCst);
        let frame = codec::flying_state_notification(seq, state.status_code());
        self.notify(id, characteristics::FLIGHT_STATUS, frame).await;
    }

    /// Report a battery level from `id`
    pub async fn report_battery(&self, id: &str, percent: u8) {
        let seq = self.notify_seq.fetch_add(1, Ordering::SeqCst);
        let frame = codec::battery_notification(seq, percent);
        self.notify(id, characteristics::BATTERY, frame).await;
    }

    /// Drop the link to `id` as if the radio went out of range
    pub async fn drop_link(&self, id: &str) {
        if self.state.write().await.links.remove(id).is_some() {
            info!("[SIM] Link to {} lost", id);
        }
    }

    /// Firmware model: react to a frame the way the drone would
    async fn firmware_react(&self, id: &str, channel: &str, data: &[u8]) {
        if data.first() == Some(&codec::MARKER_HANDSHAKE) {
            self.report_battery(id, self.battery_percent).await;
            return;
        }
        if channel == characteristics::DRIVE || data.len() < 5 || data[3] != class::PILOTING {
            return;
        }
        let states: &[FlightState] = match data[4] {
            piloting::TAKE_OFF => &[FlightState::TakingOff, FlightState::Hovering],
            piloting::LAND => &[FlightState::Landing, FlightState::Landed],
            piloting::EMERGENCY => &[FlightState::EmergencyStopped],
            _ => &[],
        };
        for state in states {
            self.report_flight_state(id, *state).await;
        }
    }
}

fn minidrone_characteristics() -> Vec<CharacteristicInfo> {
    let writable = [characteristics::DRIVE, characteristics::COMMAND, characteristics::EMERGENCY];
    let notifying = [characteristics::BATTERY, characteristics::FLIGHT_STATUS]
        .into_iter()
        .chain(characteristics::AUXILIARY);

    writable
        .into_iter()
        .map(|channel| CharacteristicInfo {
            channel: channel.to_string(),
            capabilities: Capabilities {
                write: true,
                write_without_response: true,
                notify: false,
            },
        })
        .chain(notifying.map(|channel| CharacteristicInfo {
            channel: channel.to_string(),
            capabilities: Capabilities {
                notify: true,
                ..Default::default()
            },
        }))
        .collect()
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    async fn discover(&self) -> Result<DiscoveryStream> {
        let advertised = self.state.read().await.advertised.clone();
        debug!("[SIM] Scan started, {} advertisers", advertised.len());

        let adverts = stream::iter(advertised)
            .then(|(record, delay)| async move {
                tokio::time::sleep(delay).await;
                record
            });
        // scanning never finishes on its own
        Ok(Box::pin(adverts.chain(stream::pending())))
    }

    async fn connect(&self, peripheral: &PeripheralRecord) -> Result<LinkHandle> {
        let mut state = self.state.write().await;
        if state.failing_connects.contains(&peripheral.id) {
            return Err(anyhow!("Simulated connect failure for {}", peripheral.id));
        }
        if state.links.contains_key(&peripheral.id) {
            return Err(anyhow!("{} is already connected", peripheral.id));
        }
        state.links.insert(peripheral.id.clone(), SimLink::default());
        debug!("[SIM] {} connected", peripheral.id);
        Ok(LinkHandle {
            peripheral_id: peripheral.id.clone(),
        })
    }

    async fn enumerate_characteristics(&self, link: &LinkHandle) -> Result<Vec<CharacteristicInfo>> {
        let state = self.state.read().await;
        if !state.links.contains_key(&link.peripheral_id) {
            return Err(anyhow!("Not connected to {}", link.peripheral_id));
        }
        let mut available = minidrone_characteristics();
        for info in available.iter_mut() {
            if state
                .read_only
                .contains(&(link.peripheral_id.clone(), info.channel.clone()))
            {
                info.capabilities.write = false;
                info.capabilities.write_without_response = false;
            }
        }
        Ok(available)
    }

    async fn write(&self, link: &LinkHandle, channel: &str, data: &[u8], with_ack: bool) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if !state.links.contains_key(&link.peripheral_id) {
                return Err(anyhow!("Not connected to {}", link.peripheral_id));
            }
            if state.failing_writes.contains(&link.peripheral_id) {
                return Err(anyhow!("Simulated write failure for {}", link.peripheral_id));
            }
            state.writes.push(WriteRecord {
                peripheral_id: link.peripheral_id.clone(),
                channel: channel.to_string(),
                data: Bytes::copy_from_slice(data),
                with_ack,
            });
        }

        if self.firmware {
            self.firmware_react(&link.peripheral_id, channel, data).await;
        }
        Ok(())
    }

    async fn subscribe(&self, link: &LinkHandle, channel: &str) -> Result<NotificationStream> {
        let mut state = self.state.write().await;
        let sim_link = state
            .links
            .get_mut(&link.peripheral_id)
            .ok_or_else(|| anyhow!("Not connected to {}", link.peripheral_id))?;
        let (tx, rx) = mpsc::unbounded();
        sim_link
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Box::pin(rx))
    }

    async fn disconnect(&self, link: &LinkHandle) -> Result<()> {
        let mut state = self.state.write().await;
        state.links.remove(&link.peripheral_id);
        state.disconnects.push(link.peripheral_id.clone());
        debug!("[SIM] {} disconnected", link.peripheral_id);
        Ok(())
    }

    async fn rssi(&self, link: &LinkHandle) -> Result<Option<i16>> {
        let state = self.state.read().await;
        if !state.links.contains_key(&link.peripheral_id) {
            return Err(anyhow!("Not connected to {}", link.peripheral_id));
        }
        let rssi = state
            .advertised
            .iter()
            .find(|(record, _)| record.id == link.peripheral_id)
            .and_then(|(record, _)| record.rssi);
        Ok(rssi.or(Some(-60)))
    }

    fn name(&self) -> &'static str {
        "Simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_writes_and_delivers_notifications() {
        let sim = SimulatedTransport::new();
        let record = PeripheralRecord::new("sim-1").with_name("RS_sim");
        sim.advertise(record.clone()).await;

        let mut discovery = sim.discover().await.unwrap();
        assert_eq!(discovery.next().await, Some(record.clone()));

        let link = sim.connect(&record).await.unwrap();
        let mut battery = sim.subscribe(&link, characteristics::BATTERY).await.unwrap();

        sim.write(&link, characteristics::COMMAND, &[0x02, 0x00], true).await.unwrap();
        assert_eq!(sim.writes_to("sim-1", characteristics::COMMAND).await.len(), 1);

        sim.report_battery("sim-1", 42).await;
        let frame = battery.next().await.unwrap();
        assert_eq!(codec::decode_battery(&frame), Ok(42));
    }

    #[tokio::test]
    async fn test_drop_link_ends_notification_streams() {
        let sim = SimulatedTransport::new();
        let record = PeripheralRecord::new("sim-2");
        let link = sim.connect(&record).await.unwrap();
        let mut status = sim.subscribe(&link, characteristics::FLIGHT_STATUS).await.unwrap();

        sim.drop_link("sim-2").await;
        assert!(status.next().await.is_none());
        assert!(sim.write(&link, characteristics::DRIVE, &[0x02], false).await.is_err());
    }

    #[tokio::test]
    async fn test_firmware_answers_take_off() {
        let sim = SimulatedTransport::new().with_firmware(90);
        let record = PeripheralRecord::new("sim-3");
        let link = sim.connect(&record).await.unwrap();
        let mut status = sim.subscribe(&link, characteristics::FLIGHT_STATUS).await.unwrap();

        let frame = codec::encode_take_off(0);
        sim.write(&link, characteristics::COMMAND, &frame, false).await.unwrap();

        let first = status.next().await.unwrap();
        let second = status.next().await.unwrap();
        assert_eq!(codec::decode_flight_status(&first), Ok(1));
        assert_eq!(codec::decode_flight_status(&second), Ok(2));
    }

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let sim = SimulatedTransport::new();
        sim.fail_connect("sim-4").await;
        assert!(sim.connect(&PeripheralRecord::new("sim-4")).await.is_err());
        assert!(!sim.is_connected("sim-4").await);
    }
}
