//! A library for decoding sensor readings from BLE advertisements in the 0x181a environmental
//! sensing format.

pub mod atc;

pub use crate::atc::{is_recognized_protocol, SensorReading};
