//! Bluetooth device discovery for finding drones

use crate::transport::traits::{DiscoveryStream, PeripheralRecord};
use anyhow::Result;
use bluer::{Adapter, AdapterEvent, Device};
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

/// Get the default Bluetooth adapter, powered on
pub async fn get_adapter() -> Result<(bluer::Session, Adapter)> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    Ok((session, adapter))
}

/// Start scanning on `adapter` and stream every advertising peripheral
///
/// Scanning stops once the returned stream is dropped.
pub async fn discover_peripherals(adapter: &Adapter) -> Result<DiscoveryStream> {
    let discover = adapter.discover_devices().await?;
    let adapter = adapter.clone();
    let (tx, rx) = mpsc::unbounded();

    info!("[BT] Scanning on {}", adapter.name());

    tokio::spawn(async move {
        tokio::pin!(discover);
        while let Some(evt) = discover.next().await {
            if let AdapterEvent::DeviceAdded(addr) = evt {
                let device = match adapter.device(addr) {
                    Ok(device) => device,
                    Err(e) => {
                        debug!("[BT] Lost track of {}: {}", addr, e);
                        continue;
                    }
                };
                let record = peripheral_record(&device).await;
                if tx.unbounded_send(record).is_err() {
                    break;
                }
            }
        }
        info!("[BT] Scan stopped");
    });

    Ok(Box::pin(rx))
}

/// Read the advertisement fields of a device into a record
pub async fn peripheral_record(device: &Device) -> PeripheralRecord {
    PeripheralRecord {
        id: device.address().to_string(),
        name: device.name().await.ok().flatten(),
        manufacturer_data: device
            .manufacturer_data()
            .await
            .ok()
            .flatten()
            .and_then(|data| manufacturer_payload(&data)),
        rssi: device.rssi().await.ok().flatten(),
    }
}

/// Flatten BlueZ manufacturer data into company id (LE) + payload
///
/// Drones advertise a single manufacturer entry; the lowest company id
/// wins if several are present.
pub fn manufacturer_payload(data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    let (company, payload) = data.iter().min_by_key(|(company, _)| **company)?;
    let mut flat = company.to_le_bytes().to_vec();
    flat.extend_from_slice(payload);
    Some(flat)
}
