//! Bluetooth transport layer using BlueZ GATT

use crate::transport::bt_discovery;
use crate::transport::traits::{
    BleTransport, Capabilities, CharacteristicInfo, DiscoveryStream, LinkHandle,
    NotificationStream, PeripheralRecord,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Adapter, Address, Device};
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use spiderlink_shared::characteristics;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A connected device and its characteristics by short id
struct ConnectedDevice {
    device: Device,
    characteristics: HashMap<String, Characteristic>,
}

/// BLE transport backed by the local BlueZ adapter
pub struct BluetoothTransport {
    _session: bluer::Session,
    adapter: Adapter,
    links: RwLock<HashMap<String, ConnectedDevice>>,
}

impl BluetoothTransport {
    /// Open the default adapter
    pub async fn new() -> Result<Self> {
        let (session, adapter) = bt_discovery::get_adapter().await?;
        info!("[BT] Using adapter {}", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
            links: RwLock::new(HashMap::new()),
        })
    }

    async fn characteristic(&self, link: &LinkHandle, channel: &str) -> Result<Characteristic> {
        let links = self.links.read().await;
        let connected = links
            .get(&link.peripheral_id)
            .ok_or_else(|| anyhow!("Not connected to {}", link.peripheral_id))?;
        connected
            .characteristics
            .get(channel)
            .cloned()
            .ok_or_else(|| anyhow!("No characteristic {} on {}", channel, link.peripheral_id))
    }
}

#[async_trait]
impl BleTransport for BluetoothTransport {
    async fn discover(&self) -> Result<DiscoveryStream> {
        bt_discovery::discover_peripherals(&self.adapter).await
    }

    async fn connect(&self, peripheral: &PeripheralRecord) -> Result<LinkHandle> {
        let addr: Address = peripheral
            .id
            .parse()
            .with_context(|| format!("Invalid Bluetooth address {}", peripheral.id))?;
        let device = self.adapter.device(addr)?;

        info!("[BT] Connecting to {} ({})", peripheral.label(), addr);
        device
            .connect()
            .await
            .map_err(|e| anyhow!("GATT connect to {} failed: {}", addr, e))?;
        info!("[BT] Connected to {}", addr);

        self.links.write().await.insert(
            peripheral.id.clone(),
            ConnectedDevice {
                device,
                characteristics: HashMap::new(),
            },
        );

        Ok(LinkHandle {
            peripheral_id: peripheral.id.clone(),
        })
    }

    async fn enumerate_characteristics(&self, link: &LinkHandle) -> Result<Vec<CharacteristicInfo>> {
        let device = {
            let links = self.links.read().await;
            links
                .get(&link.peripheral_id)
                .map(|c| c.device.clone())
                .ok_or_else(|| anyhow!("Not connected to {}", link.peripheral_id))?
        };

        let mut found = HashMap::new();
        let mut infos = Vec::new();
        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                let Some(channel) = characteristics::short_id(&uuid.to_string()) else {
                    continue;
                };
                let flags = characteristic.flags().await?;
                infos.push(CharacteristicInfo {
                    channel: channel.clone(),
                    capabilities: Capabilities {
                        write: flags.write,
                        write_without_response: flags.write_without_response,
                        notify: flags.notify,
                    },
                });
                found.insert(channel, characteristic);
            }
        }
        debug!("[BT] {} exposes {} characteristics", link.peripheral_id, infos.len());

        if let Some(connected) = self.links.write().await.get_mut(&link.peripheral_id) {
            connected.characteristics = found;
        }
        Ok(infos)
    }

    async fn write(&self, link: &LinkHandle, channel: &str, data: &[u8], with_ack: bool) -> Result<()> {
        let characteristic = self.characteristic(link, channel).await?;
        let request = CharacteristicWriteRequest {
            op_type: if with_ack { WriteOp::Request } else { WriteOp::Command },
            ..Default::default()
        };
        characteristic.write_ext(data, &request).await?;
        Ok(())
    }

    async fn subscribe(&self, link: &LinkHandle, channel: &str) -> Result<NotificationStream> {
        let characteristic = self.characteristic(link, channel).await?;
        let notify = characteristic.notify().await?;
        let (tx, rx) = mpsc::unbounded();
        let channel = channel.to_string();

        tokio::spawn(async move {
            tokio::pin!(notify);
            while let Some(value) = notify.next().await {
                if tx.unbounded_send(Bytes::from(value)).is_err() {
                    break;
                }
            }
            debug!("[BT] Notifications on {} ended", channel);
        });

        Ok(Box::pin(rx))
    }

    async fn disconnect(&self, link: &LinkHandle) -> Result<()> {
        let connected = self.links.write().await.remove(&link.peripheral_id);
        match connected {
            Some(connected) => {
                connected.device.disconnect().await?;
                info!("[BT] Disconnected from {}", link.peripheral_id);
            }
            None => warn!("[BT] Disconnect for unknown link {}", link.peripheral_id),
        }
        Ok(())
    }

    async fn rssi(&self, link: &LinkHandle) -> Result<Option<i16>> {
        let links = self.links.read().await;
        let connected = links
            .get(&link.peripheral_id)
            .ok_or_else(|| anyhow!("Not connected to {}", link.peripheral_id))?;
        Ok(connected.device.rssi().await?)
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
