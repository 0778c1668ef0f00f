use crate::address::normalize_address;
use crate::identity::SensorIdentity;
use btsensor::SensorReading;
use std::fmt::{self, Display, Formatter};
use std::time::SystemTime;

/// A decoded reading from one advertisement, ready to be recorded.
///
/// The integral quantities are widened to `f64` because that is how they have always been stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    /// Normalized hardware address of the sensor.
    pub hardware_address: String,
    pub sensor_name: String,
    pub temperature_celsius: f64,
    pub relative_humidity_percent: f64,
    pub battery_percent: f64,
    pub battery_millivolts: f64,
    /// Rolling counter from the sensor, 0-255.
    pub frame_sequence_counter: f64,
    /// RSSI in dBm, if the adapter reported one.
    pub signal_strength: Option<i16>,
    /// When the advertisement was received. The sensor doesn't send a timestamp.
    pub observed_at: SystemTime,
}

impl Measurement {
    /// Decodes a payload which has already been identified as the 0x181a protocol.
    ///
    /// Returns `None` if the payload is the wrong length for the format. The sensor name is set to
    /// the normalized address until an identity is attached with [`Measurement::with_identity`].
    pub fn decode(
        hardware_address: &str,
        payload: &[u8],
        signal_strength: Option<i16>,
        observed_at: SystemTime,
    ) -> Option<Self> {
        let reading = SensorReading::decode(payload)?;
        let hardware_address = normalize_address(hardware_address);
        Some(Self {
            sensor_name: hardware_address.clone(),
            hardware_address,
            temperature_celsius: reading.temperature(),
            relative_humidity_percent: reading.humidity().into(),
            battery_percent: reading.battery_percent().into(),
            battery_millivolts: reading.battery_mv().into(),
            frame_sequence_counter: reading.packet_counter().into(),
            signal_strength,
            observed_at,
        })
    }

    pub fn with_identity(self, identity: SensorIdentity) -> Self {
        Self {
            sensor_name: identity.display_name,
            ..self
        }
    }
}

impl Display for Measurement {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({}) #{}: {:0.1}°C, {}% humidity, {}%/{}mV battery",
            self.hardware_address,
            self.sensor_name,
            self.frame_sequence_counter,
            self.temperature_celsius,
            self.relative_humidity_percent,
            self.battery_percent,
            self.battery_millivolts,
        )?;
        if let Some(rssi) = self.signal_strength {
            write!(f, ", {} dBm", rssi)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: [u8; 15] = [
        0x1a, 0x18, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x32, 0x64, 0xe8, 0x03, 0x05,
    ];

    #[test]
    fn decode_example() {
        let observed_at = SystemTime::UNIX_EPOCH;
        let measurement =
            Measurement::decode("AA:BB:CC:DD:EE:FF", &EXAMPLE, Some(-70), observed_at).unwrap();
        assert_eq!(
            measurement,
            Measurement {
                hardware_address: "aabbccddeeff".to_owned(),
                sensor_name: "aabbccddeeff".to_owned(),
                temperature_celsius: 25.6,
                relative_humidity_percent: 50.0,
                battery_percent: 100.0,
                battery_millivolts: 1000.0,
                frame_sequence_counter: 5.0,
                signal_strength: Some(-70),
                observed_at,
            }
        );
    }

    #[test]
    fn decode_negative_temperature() {
        let mut payload = EXAMPLE;
        payload[8..10].copy_from_slice(&[0xff, 0xf6]);
        let measurement =
            Measurement::decode("aabbccddeeff", &payload, None, SystemTime::now()).unwrap();
        assert_eq!(measurement.temperature_celsius, -1.0);
    }

    #[test]
    fn decode_truncated() {
        assert_eq!(
            Measurement::decode("aabbccddeeff", &EXAMPLE[..14], None, SystemTime::now()),
            None
        );
        let mut extended = EXAMPLE.to_vec();
        extended.push(0x00);
        assert_eq!(
            Measurement::decode("aabbccddeeff", &extended, None, SystemTime::now()),
            None
        );
    }

    #[test]
    fn attach_identity() {
        let measurement = Measurement::decode("AA:BB:CC:DD:EE:FF", &EXAMPLE, None, SystemTime::now())
            .unwrap()
            .with_identity(SensorIdentity {
                hardware_address: "aabbccddeeff".to_owned(),
                display_name: "Kitchen".to_owned(),
            });
        assert_eq!(measurement.sensor_name, "Kitchen");
        assert_eq!(measurement.hardware_address, "aabbccddeeff");
    }

    #[test]
    fn format() {
        let measurement =
            Measurement::decode("AA:BB:CC:DD:EE:FF", &EXAMPLE, Some(-70), SystemTime::now())
                .unwrap();
        assert_eq!(
            measurement.to_string(),
            "aabbccddeeff (aabbccddeeff) #5: 25.6°C, 50% humidity, 100%/1000mV battery, -70 dBm"
        );
    }
}
