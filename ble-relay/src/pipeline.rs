use crate::identity::IdentityResolver;
use crate::measurement::Measurement;
use crate::sink::MeasurementSink;
use async_channel::Receiver;
use btsensor::is_recognized_protocol;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::{self, JoinHandle};

/// One advertisement seen by the scanner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawAdvertisement {
    pub hardware_address: String,
    /// Manufacturer-specific data, including the two byte company or protocol identifier.
    pub manufacturer_payload: Option<Vec<u8>>,
    /// RSSI in dBm.
    pub signal_strength: Option<i16>,
    pub observed_at: SystemTime,
}

/// Turns advertisements into named measurements and passes them on to the sink.
#[derive(Debug)]
pub struct IngestPipeline {
    resolver: Arc<IdentityResolver>,
    sink: MeasurementSink,
}

impl IngestPipeline {
    pub fn new(resolver: Arc<IdentityResolver>, sink: MeasurementSink) -> Self {
        Self { resolver, sink }
    }

    /// Decodes the given advertisement and enqueues the resulting measurement, if any.
    ///
    /// Returns whether a measurement was enqueued. Advertisements from other protocols or with
    /// malformed payloads are skipped silently.
    pub fn handle(&self, event: &RawAdvertisement) -> bool {
        let Some(payload) = event.manufacturer_payload.as_deref() else {
            return false;
        };
        if !is_recognized_protocol(payload) {
            return false;
        }
        let Some(measurement) = Measurement::decode(
            &event.hardware_address,
            payload,
            event.signal_strength,
            event.observed_at,
        ) else {
            log::debug!(
                "Invalid 0x181a packet from {}: {:02x?}",
                event.hardware_address,
                payload
            );
            return false;
        };
        let identity = self.resolver.resolve(&measurement.hardware_address);
        let measurement = measurement.with_identity(identity);
        log::debug!("{}", measurement);
        match self.sink.enqueue(measurement) {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Dropping measurement from {}: {}",
                    event.hardware_address,
                    e
                );
                false
            }
        }
    }

    /// Handles events from the queue until it is closed and empty.
    pub async fn run(self: Arc<Self>, events: Receiver<RawAdvertisement>) {
        while let Ok(event) = events.recv().await {
            self.handle(&event);
        }
    }
}

/// Spawns `count` tasks which take turns handling events from the same queue.
pub fn spawn_consumers(
    pipeline: Arc<IngestPipeline>,
    events: Receiver<RawAdvertisement>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| task::spawn(pipeline.clone().run(events.clone())))
        .collect()
}
