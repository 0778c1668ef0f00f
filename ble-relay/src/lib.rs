//! Records readings from 0x181a environmental sensor advertisements in InfluxDB.
//!
//! Advertisements are pushed onto a queue by the [`scanner`], decoded and named by an
//! [`IngestPipeline`], and written in batches by a [`MeasurementSink`].

pub mod address;
pub mod config;
pub mod identity;
pub mod measurement;
pub mod pipeline;
pub mod scanner;
pub mod sink;

pub use crate::address::normalize_address;
pub use crate::identity::{IdentityResolver, SensorIdentity};
pub use crate::measurement::Measurement;
pub use crate::pipeline::{IngestPipeline, RawAdvertisement, spawn_consumers};
pub use crate::sink::{BatchWriter, InfluxWriter, MeasurementSink, SinkError};
