//! Drives many concurrent discovery events through the pipeline into an in-memory writer, and
//! checks that exactly one measurement comes out for each valid advertisement.

use async_trait::async_trait;
use ble_relay::{
    BatchWriter, IdentityResolver, IngestPipeline, Measurement, MeasurementSink,
    RawAdvertisement, spawn_consumers,
};
use btsensor::SensorReading;
use eyre::Report;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

const SENSORS: usize = 8;
const ROUNDS: usize = 50;

#[derive(Clone, Default)]
struct MemoryWriter {
    written: Arc<Mutex<Vec<Measurement>>>,
}

#[async_trait]
impl BatchWriter for MemoryWriter {
    async fn write_batch(&self, batch: &[Measurement]) -> Result<(), Report> {
        self.written.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

fn address(sensor: usize) -> String {
    format!("A4:C1:38:00:00:{:02X}", sensor)
}

fn valid_payload(sensor: usize, round: usize) -> Vec<u8> {
    SensorReading {
        vendor_id: [0xa4, 0xc1, 0x38, 0x00, 0x00, sensor as u8],
        temperature: 200 + round as i16,
        humidity: 40,
        battery_percent: 80,
        battery_mv: 2900,
        packet_counter: round as u8,
    }
    .encode()
}

/// Advertisements which must not produce a measurement.
fn invalid_payloads(sensor: usize, round: usize) -> Vec<Option<Vec<u8>>> {
    let valid = valid_payload(sensor, round);
    let mut wrong_protocol = valid.clone();
    wrong_protocol[1] = 0x1a;
    let mut too_long = valid.clone();
    too_long.push(0xff);
    vec![
        None,
        Some(vec![]),
        Some(wrong_protocol),
        Some(valid[..14].to_vec()),
        Some(too_long),
        Some(vec![0x4c, 0x00, 0x02, 0x15]),
    ]
}

fn advertisement(sensor: usize, payload: Option<Vec<u8>>) -> RawAdvertisement {
    RawAdvertisement {
        hardware_address: address(sensor),
        manufacturer_payload: payload,
        signal_strength: Some(-50 - sensor as i16),
        observed_at: SystemTime::now(),
    }
}

fn resolver() -> Arc<IdentityResolver> {
    // Name only the even sensors; the odd ones fall back to their address.
    let names: HashMap<String, String> = (0..SENSORS)
        .step_by(2)
        .map(|sensor| (address(sensor), format!("Sensor {}", sensor)))
        .collect();
    Arc::new(IdentityResolver::new(names))
}

fn check_written(written: &[Measurement]) {
    assert_eq!(written.len(), SENSORS * ROUNDS);
    let mut counts: HashMap<(String, u64), usize> = HashMap::new();
    for measurement in written {
        *counts
            .entry((
                measurement.hardware_address.clone(),
                measurement.frame_sequence_counter as u64,
            ))
            .or_default() += 1;
        let sensor = usize::from_str_radix(&measurement.hardware_address[10..], 16).unwrap();
        if sensor % 2 == 0 {
            assert_eq!(measurement.sensor_name, format!("Sensor {}", sensor));
        } else {
            assert_eq!(measurement.sensor_name, measurement.hardware_address);
        }
        assert_eq!(measurement.signal_strength, Some(-50 - sensor as i16));
        let round = measurement.frame_sequence_counter;
        assert!((measurement.temperature_celsius - (20.0 + round / 10.0)).abs() < 1e-9);
    }
    assert_eq!(counts.len(), SENSORS * ROUNDS);
    assert!(counts.values().all(|&count| count == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handle_calls() {
    let writer = MemoryWriter::default();
    let sink = MeasurementSink::spawn(writer.clone(), 10, Duration::from_millis(50));
    let pipeline = Arc::new(IngestPipeline::new(resolver(), sink.clone()));

    let tasks: Vec<_> = (0..SENSORS)
        .map(|sensor| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let mut enqueued = 0;
                for round in 0..ROUNDS {
                    for payload in invalid_payloads(sensor, round) {
                        assert!(!pipeline.handle(&advertisement(sensor, payload)));
                    }
                    if pipeline.handle(&advertisement(sensor, Some(valid_payload(sensor, round)))) {
                        enqueued += 1;
                    }
                    tokio::task::yield_now().await;
                }
                enqueued
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), ROUNDS);
    }
    sink.flush_and_close().await.unwrap();

    check_written(&writer.written.lock().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consumer_pool_from_queue() {
    let writer = MemoryWriter::default();
    let sink = MeasurementSink::spawn(writer.clone(), 10, Duration::from_secs(3600));
    let pipeline = Arc::new(IngestPipeline::new(resolver(), sink.clone()));
    let (events_tx, events_rx) = async_channel::bounded(16);
    let consumers = spawn_consumers(pipeline, events_rx, 4);

    let producers: Vec<_> = (0..SENSORS)
        .map(|sensor| {
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                for round in 0..ROUNDS {
                    for payload in invalid_payloads(sensor, round) {
                        events_tx.send(advertisement(sensor, payload)).await.unwrap();
                    }
                    events_tx
                        .send(advertisement(sensor, Some(valid_payload(sensor, round))))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    events_tx.close();
    for consumer in consumers {
        consumer.await.unwrap();
    }
    sink.flush_and_close().await.unwrap();

    check_written(&writer.written.lock().unwrap());
}

#[tokio::test]
async fn duplicates_are_recorded_independently() {
    let writer = MemoryWriter::default();
    let sink = MeasurementSink::spawn(writer.clone(), 10, Duration::from_secs(3600));
    let pipeline = IngestPipeline::new(resolver(), sink.clone());

    let duplicate = advertisement(1, Some(valid_payload(1, 7)));
    assert!(pipeline.handle(&duplicate));
    assert!(pipeline.handle(&duplicate));
    // Out of order counter.
    assert!(pipeline.handle(&advertisement(1, Some(valid_payload(1, 3)))));
    sink.flush_and_close().await.unwrap();

    let counters: Vec<f64> = writer
        .written
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.frame_sequence_counter)
        .collect();
    assert_eq!(counters, vec![7.0, 7.0, 3.0]);
}
