//! BLE transport abstraction for pluggable backends

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use spiderlink_shared::Advertisement;
use std::pin::Pin;

/// A peripheral seen on the discovery stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralRecord {
    /// Platform identifier (hardware address on BlueZ)
    pub id: String,
    /// Advertised local name
    pub name: Option<String>,
    /// Manufacturer payload: company id (little-endian) followed by data
    pub manufacturer_data: Option<Vec<u8>>,
    /// Signal strength at discovery time
    pub rssi: Option<i16>,
}

impl PeripheralRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            manufacturer_data: None,
            rssi: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_manufacturer_data(mut self, data: Vec<u8>) -> Self {
        self.manufacturer_data = Some(data);
        self
    }

    /// Name if advertised, id otherwise
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Exact match on id or advertised name
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector || self.name.as_deref() == Some(selector)
    }
}

impl Advertisement for PeripheralRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn local_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn manufacturer_payload(&self) -> Option<&[u8]> {
        self.manufacturer_data.as_deref()
    }
}

/// Opaque handle to an established link, owned by exactly one session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    pub peripheral_id: String,
}

/// What a characteristic supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

/// A characteristic, keyed by its short channel id (e.g. `fa0a`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub channel: String,
    pub capabilities: Capabilities,
}

/// Stream of discovered peripherals
pub type DiscoveryStream = Pin<Box<dyn Stream<Item = PeripheralRecord> + Send>>;

/// Stream of notification payloads; ends when the link goes away
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// The narrow BLE surface the session and swarm need
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Start scanning and stream discovered peripherals
    async fn discover(&self) -> Result<DiscoveryStream>;

    /// Connect to a discovered peripheral
    async fn connect(&self, peripheral: &PeripheralRecord) -> Result<LinkHandle>;

    /// Enumerate the characteristics of every service on the link
    async fn enumerate_characteristics(&self, link: &LinkHandle) -> Result<Vec<CharacteristicInfo>>;

    /// Write a frame; `with_ack` selects write-request over write-command
    async fn write(&self, link: &LinkHandle, channel: &str, data: &[u8], with_ack: bool) -> Result<()>;

    /// Subscribe to notifications on a channel
    async fn subscribe(&self, link: &LinkHandle, channel: &str) -> Result<NotificationStream>;

    /// Tear the link down
    async fn disconnect(&self, link: &LinkHandle) -> Result<()>;

    /// Current signal strength of the link
    async fn rssi(&self, link: &LinkHandle) -> Result<Option<i16>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
