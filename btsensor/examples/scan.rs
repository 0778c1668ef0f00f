use bluez_async::{BluetoothEvent, BluetoothSession, DeviceEvent, DeviceId, DiscoveryFilter};
use btsensor::atc::{SensorReading, PROTOCOL_ID, UUID};
use futures::stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), eyre::Report> {
    pretty_env_logger::init();

    let (_, session) = BluetoothSession::new().await?;
    let mut events = session.event_stream().await?;

    // Start scanning for Bluetooth devices, reporting every advertisement.
    session
        .start_discovery_with_filter(&DiscoveryFilter {
            duplicate_data: Some(true),
            ..DiscoveryFilter::default()
        })
        .await?;

    // Wait for events.
    while let Some(event) = events.next().await {
        match event {
            BluetoothEvent::Device {
                id,
                event: DeviceEvent::ManufacturerData { manufacturer_data },
            } => {
                if let Some(data) = manufacturer_data.get(&PROTOCOL_ID) {
                    print_reading(&id, "manufacturer data", data);
                }
            }
            BluetoothEvent::Device {
                id,
                event: DeviceEvent::ServiceData { service_data },
            } => {
                if let Some(data) = service_data.get(&UUID) {
                    print_reading(&id, "service data", data);
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// BlueZ strips the protocol identifier from both kinds of advertisement, so it is put back before
/// decoding.
fn print_reading(id: &DeviceId, source: &str, data: &[u8]) {
    let mut payload = PROTOCOL_ID.to_le_bytes().to_vec();
    payload.extend_from_slice(data);
    println!("{} ({}): {:02x?}", id, source, payload);
    if let Some(reading) = SensorReading::decode(&payload) {
        println!("  {}", reading);
    } else {
        println!("  (Failed to decode.)");
    }
}
