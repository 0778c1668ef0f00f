//! Batched, asynchronous recording of measurements.
//!
//! [`MeasurementSink::enqueue`] hands a measurement to a writer task over an unbounded channel and
//! never waits. The writer task collects measurements into batches and writes a batch when it is
//! full, when the flush interval elapses, or when asked to flush or close. Batches the backend fails
//! to write are logged and dropped.

use crate::measurement::Measurement;
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use eyre::{Report, WrapErr};
use influx_db_client::{Client, Point, Precision};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

const INFLUXDB_PRECISION: Option<Precision> = Some(Precision::Milliseconds);
// tokio intervals panic on a zero period.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink is closed")]
    Closed,
    #[error("Invalid record: {0}")]
    InvalidRecord(&'static str),
    #[error("Writer task failed: {0}")]
    Join(#[from] JoinError),
}

/// A backend which can durably store a batch of measurements.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    async fn write_batch(&self, batch: &[Measurement]) -> Result<(), Report>;
}

enum Command {
    Record(Measurement),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. Clones share the same queue and writer.
#[derive(Clone)]
pub struct MeasurementSink {
    commands: Sender<Command>,
    writer_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Debug for MeasurementSink {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "MeasurementSink ({} queued)", self.commands.len())
    }
}

impl MeasurementSink {
    /// Spawns a writer task which writes batches of up to `batch_size` measurements to `writer`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(writer: impl BatchWriter, batch_size: usize, flush_interval: Duration) -> Self {
        let (commands, commands_rx) = async_channel::unbounded();
        let writer_task = task::spawn(run_writer(
            writer,
            commands_rx,
            batch_size.max(1),
            flush_interval.max(MIN_FLUSH_INTERVAL),
        ));
        Self {
            commands,
            writer_task: Arc::new(Mutex::new(Some(writer_task))),
        }
    }

    /// Queues the given measurement to be written. Never waits for I/O.
    pub fn enqueue(&self, measurement: Measurement) -> Result<(), SinkError> {
        if measurement.hardware_address.is_empty() {
            return Err(SinkError::InvalidRecord("empty hardware address"));
        }
        if measurement.sensor_name.is_empty() {
            return Err(SinkError::InvalidRecord("empty sensor name"));
        }
        self.commands
            .try_send(Command::Record(measurement))
            .map_err(|_| SinkError::Closed)
    }

    /// Waits until every measurement enqueued before this call has been offered to the backend.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .try_send(Command::Flush(done_tx))
            .map_err(|_| SinkError::Closed)?;
        done_rx.await.map_err(|_| SinkError::Closed)
    }

    /// Writes everything still queued, then stops the writer task and waits for it to finish.
    ///
    /// Any later call to `enqueue` on this sink or its clones fails with [`SinkError::Closed`].
    pub async fn flush_and_close(&self) -> Result<(), SinkError> {
        self.commands.close();
        if let Some(writer_task) = self.writer_task.lock().await.take() {
            writer_task.await?;
        }
        Ok(())
    }
}

async fn run_writer(
    writer: impl BatchWriter,
    commands: Receiver<Command>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut flush_timer = time::interval(flush_interval);
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(Command::Record(measurement)) => {
                    batch.push(measurement);
                    if batch.len() >= batch_size {
                        write_pending(&writer, &mut batch).await;
                    }
                }
                Ok(Command::Flush(done)) => {
                    write_pending(&writer, &mut batch).await;
                    // The caller may have given up waiting, which is fine.
                    let _ = done.send(());
                }
                // Closed and drained.
                Err(_) => {
                    write_pending(&writer, &mut batch).await;
                    log::info!("Measurement sink closed");
                    return;
                }
            },
            _ = flush_timer.tick() => write_pending(&writer, &mut batch).await,
        }
    }
}

async fn write_pending(writer: &impl BatchWriter, batch: &mut Vec<Measurement>) {
    if batch.is_empty() {
        return;
    }
    log::trace!("Writing batch of {} measurements", batch.len());
    if let Err(e) = writer.write_batch(batch).await {
        log::error!("Dropping {} measurements: {:?}", batch.len(), e);
    }
    batch.clear();
}

/// Writes measurements as points to an InfluxDB database.
pub struct InfluxWriter {
    client: Client,
    measurement: String,
    relay: String,
}

impl InfluxWriter {
    pub fn new(client: Client, measurement: &str, relay: &str) -> Self {
        Self {
            client,
            measurement: measurement.to_owned(),
            relay: relay.to_owned(),
        }
    }
}

#[async_trait]
impl BatchWriter for InfluxWriter {
    async fn write_batch(&self, batch: &[Measurement]) -> Result<(), Report> {
        let points = batch
            .iter()
            .map(|measurement| point_for_measurement(&self.measurement, &self.relay, measurement));
        // Passing None for rp should use the default retention policy for the database.
        self.client
            .write_points(points, INFLUXDB_PRECISION, None)
            .await
            .wrap_err("Failed to send measurements to InfluxDB")?;
        Ok(())
    }
}

/// Construct an InfluxDB `Point` for the given measurement, timestamped with when it was observed.
fn point_for_measurement<'a>(
    measurement_name: &str,
    relay: &'a str,
    measurement: &'a Measurement,
) -> Point<'a> {
    let timestamp = measurement
        .observed_at
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    let mut point = Point::new(measurement_name)
        .add_timestamp(timestamp)
        .add_tag("mac", measurement.hardware_address.as_str())
        .add_tag("relay", relay)
        .add_tag("sensor_name", measurement.sensor_name.as_str())
        .add_field(
            "temperature",
            (measurement.temperature_celsius * 100.0).round() / 100.0,
        )
        .add_field("humidity", measurement.relative_humidity_percent)
        .add_field("battery_percent", measurement.battery_percent)
        .add_field("battery_mv", measurement.battery_millivolts)
        .add_field("frame_packet_counter", measurement.frame_sequence_counter);
    if let Some(rssi) = measurement.signal_strength {
        point = point.add_field("rssi", i64::from(rssi));
    }
    point
}
