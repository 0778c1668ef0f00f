//! Support for the 15 byte environmental sensing advertisement format, as broadcast in the
//! manufacturer-specific data of custom thermometer firmware.
//!
//! | Bytes  | Field                                  |
//! |--------|----------------------------------------|
//! | 0..2   | protocol identifier `0x181a`, LE       |
//! | 2..8   | vendor identifier, opaque              |
//! | 8..10  | temperature in 0.1°C, `i16` **BE**     |
//! | 10     | relative humidity in %, `u8`           |
//! | 11     | battery level in %, `u8`               |
//! | 12..14 | battery voltage in mV, `u16` **LE**    |
//! | 14     | frame counter, `u8`, wraps             |

use bluez_async::uuid_from_u16;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Protocol identifier carried in the first two bytes of the payload.
pub const PROTOCOL_ID: u16 = 0x181a;

/// GATT service 0x181a, environmental sensing.
pub const UUID: Uuid = uuid_from_u16(PROTOCOL_ID);

/// Length of a complete payload, including the protocol identifier.
pub const PAYLOAD_LENGTH: usize = 15;

/// Returns whether the given advertisement payload starts with the 0x181a protocol identifier.
///
/// This doesn't check that the payload is long enough to decode.
pub fn is_recognized_protocol(payload: &[u8]) -> bool {
    match payload {
        [low, high, ..] => u16::from_le_bytes([*low, *high]) == PROTOCOL_ID,
        _ => false,
    }
}

/// A raw sensor reading, as transmitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SensorReading {
    pub vendor_id: [u8; 6],
    /// Temperature in tenths of a degree Celsius.
    pub temperature: i16,
    pub humidity: u8,
    pub battery_percent: u8,
    pub battery_mv: u16,
    pub packet_counter: u8,
}

impl Display for SensorReading {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "({}): {:0.1}°C, {}% humidity, {}%/{}mV battery",
            self.packet_counter,
            self.temperature(),
            self.humidity,
            self.battery_percent,
            self.battery_mv
        )
    }
}

impl SensorReading {
    /// Tries to decode the given manufacturer-specific payload as a sensor reading.
    ///
    /// Returns `None` unless it is exactly [`PAYLOAD_LENGTH`] bytes long. The protocol identifier
    /// is not checked here; use [`is_recognized_protocol`] for that.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let data: &[u8; PAYLOAD_LENGTH] = data.try_into().ok()?;
        let [
            _,
            _,
            v0,
            v1,
            v2,
            v3,
            v4,
            v5,
            t0,
            t1,
            humidity,
            battery_percent,
            mv0,
            mv1,
            packet_counter,
        ] = *data;
        Some(Self {
            vendor_id: [v0, v1, v2, v3, v4, v5],
            temperature: i16::from_be_bytes([t0, t1]),
            humidity,
            battery_percent,
            battery_mv: u16::from_le_bytes([mv0, mv1]),
            packet_counter,
        })
    }

    /// Encodes the reading as a complete payload, including the protocol identifier.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(PAYLOAD_LENGTH);
        data.extend_from_slice(&PROTOCOL_ID.to_le_bytes());
        data.extend_from_slice(&self.vendor_id);
        data.extend_from_slice(&self.temperature.to_be_bytes());
        data.push(self.humidity);
        data.push(self.battery_percent);
        data.extend_from_slice(&self.battery_mv.to_le_bytes());
        data.push(self.packet_counter);
        data
    }

    /// Returns the temperature reading in °C.
    pub fn temperature(&self) -> f64 {
        f64::from(self.temperature) / 10.0
    }

    /// Returns the relative humidity, as a percentage.
    pub fn humidity(&self) -> u8 {
        self.humidity
    }

    /// Returns the battery level, as a percentage.
    pub fn battery_percent(&self) -> u8 {
        self.battery_percent
    }

    /// Returns the battery voltage, in mV.
    pub fn battery_mv(&self) -> u16 {
        self.battery_mv
    }

    /// Returns the rolling frame counter.
    pub fn packet_counter(&self) -> u8 {
        self.packet_counter
    }
}
