//! Feeds advertisements seen by BlueZ into the discovery queue.

use crate::pipeline::RawAdvertisement;
use async_channel::Sender;
use bluez_async::{
    BluetoothEvent, BluetoothSession, DeviceEvent, DeviceId, DiscoveryFilter, MacAddress,
};
use btsensor::atc::{PROTOCOL_ID, UUID};
use eyre::Report;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::time::SystemTime;
use uuid::Uuid;

/// Scans for advertisements until the event stream ends or the queue is closed.
///
/// Only returns `Ok` if the queue was closed.
pub async fn run_scanner(
    session: &BluetoothSession,
    events: Sender<RawAdvertisement>,
) -> Result<(), Report> {
    let mut bluetooth_events = session.event_stream().await?;
    // Ask for every advertisement, not just the ones which changed.
    session
        .start_discovery_with_filter(&DiscoveryFilter {
            duplicate_data: Some(true),
            ..DiscoveryFilter::default()
        })
        .await?;
    println!("Scanning for 0x181a temperature advertisements...");

    let mut known_devices = KnownDevices::default();
    while let Some(event) = bluetooth_events.next().await {
        let observed_at = SystemTime::now();
        let (id, payloads) = match event {
            BluetoothEvent::Device {
                id,
                event: DeviceEvent::ManufacturerData { manufacturer_data },
            } => (id, manufacturer_payloads(manufacturer_data)),
            BluetoothEvent::Device {
                id,
                event: DeviceEvent::ServiceData { service_data },
            } => match service_data_payload(&service_data) {
                Some(payload) => (id, vec![payload]),
                None => continue,
            },
            BluetoothEvent::Device {
                id,
                event: DeviceEvent::Rssi { rssi },
            } => {
                known_devices.update_signal_strength(&id, rssi);
                continue;
            }
            _ => continue,
        };

        let device = match known_devices.get(&id).cloned() {
            Some(device) => device,
            None => match session.get_device_info(&id).await {
                Ok(info) => known_devices
                    .insert(id, info.mac_address, info.rssi)
                    .clone(),
                Err(e) => {
                    log::warn!("Failed to get info for {:?}: {}", id, e);
                    continue;
                }
            },
        };
        for payload in payloads {
            let advertisement = RawAdvertisement {
                hardware_address: device.hardware_address.clone(),
                manufacturer_payload: Some(payload),
                signal_strength: device.signal_strength,
                observed_at,
            };
            if events.send(advertisement).await.is_err() {
                log::info!("Discovery queue closed, stopping scanner");
                return Ok(());
            }
        }
    }

    eyre::bail!("Bluetooth event stream ended")
}

/// Address and most recent signal strength of a device which has been seen before.
#[derive(Clone, Debug, Eq, PartialEq)]
struct KnownDevice {
    hardware_address: String,
    signal_strength: Option<i16>,
}

/// Devices seen so far, so that BlueZ is only asked for a device's address the first time it
/// advertises. Signal strength is kept current from RSSI change events.
#[derive(Debug, Default)]
struct KnownDevices {
    devices: HashMap<DeviceId, KnownDevice>,
}

impl KnownDevices {
    fn get(&self, id: &DeviceId) -> Option<&KnownDevice> {
        self.devices.get(id)
    }

    fn insert(
        &mut self,
        id: DeviceId,
        mac_address: MacAddress,
        signal_strength: Option<i16>,
    ) -> &KnownDevice {
        let device = KnownDevice {
            hardware_address: mac_address.to_string(),
            signal_strength,
        };
        self.devices
            .entry(id)
            .and_modify(|known| *known = device.clone())
            .or_insert(device)
    }

    /// Unknown devices are skipped; their signal strength is read along with their address.
    fn update_signal_strength(&mut self, id: &DeviceId, rssi: i16) {
        if let Some(device) = self.devices.get_mut(id) {
            device.signal_strength = Some(rssi);
        }
    }
}

/// BlueZ splits the company identifier off manufacturer-specific data; put it back.
fn manufacturer_payloads(manufacturer_data: HashMap<u16, Vec<u8>>) -> Vec<Vec<u8>> {
    manufacturer_data
        .into_iter()
        .map(|(company_id, data)| with_identifier(company_id, &data))
        .collect()
}

/// Some firmware sends the same payload as service data for UUID 0x181a instead.
fn service_data_payload(service_data: &HashMap<Uuid, Vec<u8>>) -> Option<Vec<u8>> {
    service_data
        .get(&UUID)
        .map(|data| with_identifier(PROTOCOL_ID, data))
}

fn with_identifier(identifier: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 2);
    payload.extend_from_slice(&identifier.to_le_bytes());
    payload.extend_from_slice(data);
    payload
}
