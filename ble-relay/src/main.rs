use ble_relay::config::{Config, get_influxdb_client};
use ble_relay::identity::read_sensor_names;
use ble_relay::scanner::run_scanner;
use ble_relay::{IdentityResolver, InfluxWriter, IngestPipeline, MeasurementSink, spawn_consumers};
use bluez_async::BluetoothSession;
use eyre::{Report, WrapErr};
use futures::future::join_all;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    pretty_env_logger::init();
    color_backtrace::install();

    let config = Config::from_file()?;
    let sensor_names = read_sensor_names(&config.sensor_names_filename)?;
    let resolver = Arc::new(IdentityResolver::new(sensor_names));
    log::info!(
        "Relay '{}' loaded {} sensor names",
        config.relay.name,
        resolver.len()
    );

    let influxdb_client = get_influxdb_client(&config.influxdb)?;
    let sink = MeasurementSink::spawn(
        InfluxWriter::new(
            influxdb_client,
            &config.influxdb.measurement,
            &config.relay.name,
        ),
        config.influxdb.batch_size,
        config.influxdb.flush_interval,
    );

    let (events_tx, events_rx) = async_channel::bounded(config.pipeline.queue_capacity);
    let pipeline = Arc::new(IngestPipeline::new(resolver, sink.clone()));
    let consumers = spawn_consumers(pipeline, events_rx, config.pipeline.consumers);

    // Connect a Bluetooth session.
    let (dbus_handle, session) = BluetoothSession::new()
        .await
        .wrap_err("Connecting to BlueZ")?;

    // Run until the first of these finishes. Whichever it is, shut down cleanly so that nothing
    // already decoded is lost.
    let res: Result<(), Report> = tokio::select! {
        // If this ever finishes, we lost connection to D-Bus.
        res = dbus_handle => match res {
            Ok(()) => Err(eyre::eyre!("D-Bus connection finished")),
            Err(e) => Err(Report::new(e).wrap_err("D-Bus connection lost")),
        },
        res = run_scanner(&session, events_tx.clone()) => res,
        () = shutdown_signal() => {
            log::info!("Received shutdown signal");
            Ok(())
        }
    };

    // Let the consumers drain whatever is already queued, then write it all out.
    events_tx.close();
    join_all(consumers).await;
    sink.flush_and_close()
        .await
        .wrap_err("Flushing measurements")?;
    log::info!("Shut down");

    res
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
