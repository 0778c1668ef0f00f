use eyre::{Report, WrapErr};
use influx_db_client::{Client, reqwest::Url};
use serde::{Deserialize as _, Deserializer};
use serde_derive::Deserialize;
use std::fs::read_to_string;
use std::time::Duration;

const DEFAULT_RELAY_NAME: &str = "ble-relay";
const DEFAULT_SENSOR_NAMES_FILENAME: &str = "sensor-names.toml";
const DEFAULT_INFLUXDB_URL: &str = "http://localhost:8086";
const DEFAULT_DATABASE: &str = "temperature_sensors_v1";
const DEFAULT_MEASUREMENT: &str = "air";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_CONSUMERS: usize = 2;
const CONFIG_FILENAME: &str = "ble-relay.toml";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub relay: RelayConfig,
    pub sensor_names_filename: String,
    pub influxdb: InfluxDbConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Reads the config file named by the first command line argument, or `ble-relay.toml` in the
    /// working directory if there is none.
    pub fn from_file() -> Result<Config, Report> {
        let filename = std::env::args()
            .nth(1)
            .unwrap_or_else(|| CONFIG_FILENAME.to_owned());
        Config::read(&filename)
    }

    pub fn read(filename: &str) -> Result<Config, Report> {
        let config_file =
            read_to_string(filename).wrap_err_with(|| format!("Reading {filename}"))?;
        let config: Config =
            toml::from_str(&config_file).wrap_err_with(|| format!("Parsing {filename}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Report> {
        if self.relay.name.is_empty() {
            eyre::bail!("relay.name must not be empty");
        }
        if self.influxdb.batch_size == 0 {
            eyre::bail!("influxdb.batch_size must be at least 1");
        }
        if self.influxdb.flush_interval.is_zero() {
            eyre::bail!("influxdb.flush_interval_seconds must be at least 1");
        }
        if self.pipeline.queue_capacity == 0 || self.pipeline.consumers == 0 {
            eyre::bail!("pipeline.queue_capacity and pipeline.consumers must be at least 1");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// The name of this station, attached to every reading it records.
    pub name: String,
}

impl Default for RelayConfig {
    fn default() -> RelayConfig {
        RelayConfig {
            name: DEFAULT_RELAY_NAME.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfluxDbConfig {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub measurement: String,
    /// The number of readings to collect before writing them in one request.
    pub batch_size: usize,
    /// The longest a reading may wait for its batch to fill up.
    #[serde(
        deserialize_with = "de_duration_seconds",
        rename = "flush_interval_seconds"
    )]
    pub flush_interval: Duration,
}

impl Default for InfluxDbConfig {
    fn default() -> InfluxDbConfig {
        InfluxDbConfig {
            url: DEFAULT_INFLUXDB_URL.parse().unwrap(),
            username: None,
            password: None,
            database: DEFAULT_DATABASE.to_owned(),
            measurement: DEFAULT_MEASUREMENT.to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// How many discovery events may be waiting to be decoded before the scanner has to wait.
    pub queue_capacity: usize,
    pub consumers: usize,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            consumers: DEFAULT_CONSUMERS,
        }
    }
}

pub fn de_duration_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let seconds = u64::deserialize(d)?;
    Ok(Duration::from_secs(seconds))
}

/// Construct a new InfluxDB `Client` based on the given configuration options.
pub fn get_influxdb_client(config: &InfluxDbConfig) -> Result<Client, Report> {
    let mut influxdb_client = Client::new(config.url.to_owned(), &config.database);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        influxdb_client = influxdb_client.set_authentication(username, password);
    }
    Ok(influxdb_client)
}
