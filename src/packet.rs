//! Line-protocol decoding for the telemetry wire format.
//!
//! Field units emit newline-terminated, semicolon-delimited lines:
//!
//! ```text
//! <prefix>;Time-<hh:mm:ss>;Latitude-<f>;Longitude-<f>;Satellites-<n>;Acceleration:<x>,<y>,<z>
//! ```
//!
//! The leading token is a frame prefix the firmware varies freely and is
//! always skipped. Decoding is pure and knows nothing about the transport
//! the line was read from.

use thiserror::Error;

/// Fewest semicolon-delimited fields a frame can carry and still be a
/// complete reading.
pub const MIN_FIELDS: usize = 6;

/// Errors that can occur while decoding a wire line.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    EmptyLine,

    #[error("not enough fields ({found} of at least {})", MIN_FIELDS)]
    NotEnoughFields { found: usize },

    #[error("invalid {field} value {value:?}: {source}")]
    InvalidFloat {
        field: &'static str,
        value: String,
        source: std::num::ParseFloatError,
    },

    #[error("invalid Satellites value {value:?}: {source}")]
    InvalidSatellites {
        value: String,
        source: std::num::ParseIntError,
    },

    #[error("malformed acceleration field {value:?}")]
    MalformedAcceleration { value: String },
}

/// One decoded telemetry reading, before persistence decorates it.
///
/// The time label is the device-local clock as transmitted; it is never
/// validated against wall time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub satellites: u32,
    /// Axis order x, y, z.
    pub acceleration: [f64; 3],
}

/// Decode one wire line into a [`Packet`].
///
/// Tokens are dispatched against a closed tag set; unrecognized tags are
/// skipped so firmware can add fields without breaking old stations, and a
/// repeated tag overwrites the earlier occurrence. Both are permissive-
/// parsing choices inherited from the deployed devices, not validated
/// protocol guarantees. A tag that never appears leaves its zero default
/// in place.
pub fn decode_line(line: &str) -> Result<Packet, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::EmptyLine);
    }

    let fields: Vec<&str> = line.split(';').collect();
    if fields.len() < MIN_FIELDS {
        return Err(DecodeError::NotEnoughFields {
            found: fields.len(),
        });
    }

    let mut packet = Packet::default();

    for field in &fields[1..] {
        if let Some(value) = field.strip_prefix("Time-") {
            packet.time = value.to_string();
        } else if let Some(value) = field.strip_prefix("Latitude-") {
            packet.latitude = parse_float("Latitude", value)?;
        } else if let Some(value) = field.strip_prefix("Longitude-") {
            packet.longitude = parse_float("Longitude", value)?;
        } else if let Some(value) = field.strip_prefix("Satellites-") {
            packet.satellites =
                value
                    .parse()
                    .map_err(|source| DecodeError::InvalidSatellites {
                        value: value.to_string(),
                        source,
                    })?;
        } else if field.starts_with("Acceleration") {
            packet.acceleration = parse_acceleration(field)?;
        }
    }

    Ok(packet)
}

/// Render a packet back onto the wire in canonical field order.
///
/// The leading token is a `*` frame prefix the decoder skips. Values are
/// written at display precision (coordinates 6 decimals, acceleration 3),
/// so decoding the result reproduces the packet to that precision rather
/// than bit-exactly.
pub fn encode_line(packet: &Packet) -> String {
    format!(
        "*;Time-{};Latitude-{:.6};Longitude-{:.6};Satellites-{};Acceleration:{:.3},{:.3},{:.3}",
        packet.time,
        packet.latitude,
        packet.longitude,
        packet.satellites,
        packet.acceleration[0],
        packet.acceleration[1],
        packet.acceleration[2],
    )
}

fn parse_float(field: &'static str, value: &str) -> Result<f64, DecodeError> {
    value.parse().map_err(|source| DecodeError::InvalidFloat {
        field,
        value: value.to_string(),
        source,
    })
}

/// The acceleration field is `Acceleration:<x>,<y>,<z>`; anything other
/// than exactly three numeric components is a decode error, never a
/// partially-filled vector.
fn parse_acceleration(field: &str) -> Result<[f64; 3], DecodeError> {
    let payload = match field.split_once(':') {
        Some((_, payload)) => payload,
        None => {
            return Err(DecodeError::MalformedAcceleration {
                value: field.to_string(),
            })
        }
    };

    let components: Vec<&str> = payload.split(',').collect();
    if components.len() != 3 {
        return Err(DecodeError::MalformedAcceleration {
            value: field.to_string(),
        });
    }

    let mut acceleration = [0.0; 3];
    for (slot, component) in acceleration.iter_mut().zip(&components) {
        *slot = parse_float("Acceleration", component)?;
    }

    Ok(acceleration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_packet() -> Packet {
        Packet {
            time: "14:30:12".to_string(),
            latitude: 54.687157,
            longitude: 25.279652,
            satellites: 11,
            acceleration: [0.125, -0.98, 9.807],
        }
    }

    #[test]
    fn test_decode_full_line() {
        let line = "ignored;Time-12:00:00;Latitude-54.1;Longitude-25.2;Satellites-9;Acceleration:0.1,-0.2,0.3";
        let packet = decode_line(line).unwrap();
        assert_eq!(packet.time, "12:00:00");
        assert_eq!(packet.latitude, 54.1);
        assert_eq!(packet.longitude, 25.2);
        assert_eq!(packet.satellites, 9);
        assert_eq!(packet.acceleration, [0.1, -0.2, 0.3]);
    }

    #[test]
    fn test_decode_empty_line() {
        assert!(matches!(decode_line(""), Err(DecodeError::EmptyLine)));
        assert!(matches!(decode_line("  \r\n"), Err(DecodeError::EmptyLine)));
    }

    #[test]
    fn test_decode_too_few_fields() {
        assert!(matches!(
            decode_line("x;Acceleration:1,2"),
            Err(DecodeError::NotEnoughFields { found: 2 })
        ));
        assert!(matches!(
            decode_line("a;b;c;d;e"),
            Err(DecodeError::NotEnoughFields { found: 5 })
        ));
    }

    #[test]
    fn test_decode_short_acceleration_vector() {
        let line = "*;Time-12:00:00;Latitude-1.0;Longitude-2.0;Satellites-3;Acceleration:1,2";
        assert!(matches!(
            decode_line(line),
            Err(DecodeError::MalformedAcceleration { .. })
        ));
    }

    #[test]
    fn test_decode_acceleration_without_payload() {
        let line = "*;Time-12:00:00;Latitude-1.0;Longitude-2.0;Satellites-3;Acceleration";
        assert!(matches!(
            decode_line(line),
            Err(DecodeError::MalformedAcceleration { .. })
        ));
    }

    #[test]
    fn test_decode_ignores_unknown_tags() {
        let line = "*;Time-08:15:00;Altitude-112.5;Latitude-54.5;Longitude-25.5;Satellites-6;Acceleration:1,2,3;Battery-87";
        let packet = decode_line(line).unwrap();
        assert_eq!(packet.time, "08:15:00");
        assert_eq!(packet.satellites, 6);
        assert_eq!(packet.acceleration, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_decode_duplicate_tag_last_wins() {
        let line = "*;Time-08:00:00;Time-09:00:00;Latitude-1.0;Longitude-2.0;Satellites-4;Acceleration:0,0,1";
        let packet = decode_line(line).unwrap();
        assert_eq!(packet.time, "09:00:00");
    }

    #[test]
    fn test_decode_field_order_is_free() {
        let line = "*;Acceleration:0.5,0.6,0.7;Satellites-5;Longitude-25.9;Latitude-54.9;Time-23:59:59";
        let packet = decode_line(line).unwrap();
        assert_eq!(packet.time, "23:59:59");
        assert_eq!(packet.latitude, 54.9);
        assert_eq!(packet.longitude, 25.9);
        assert_eq!(packet.satellites, 5);
        assert_eq!(packet.acceleration, [0.5, 0.6, 0.7]);
    }

    #[test]
    fn test_decode_missing_tags_leave_defaults() {
        let line = "*;Time-10:00:00;a;b;c;d";
        let packet = decode_line(line).unwrap();
        assert_eq!(packet.time, "10:00:00");
        assert_eq!(packet.latitude, 0.0);
        assert_eq!(packet.satellites, 0);
        assert_eq!(packet.acceleration, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_rejects_bad_float() {
        let line = "*;Time-10:00:00;Latitude-north;Longitude-2.0;Satellites-3;Acceleration:1,2,3";
        match decode_line(line) {
            Err(DecodeError::InvalidFloat { field, value, .. }) => {
                assert_eq!(field, "Latitude");
                assert_eq!(value, "north");
            }
            other => panic!("expected InvalidFloat, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_negative_satellites() {
        let line = "*;Time-10:00:00;Latitude-1.0;Longitude-2.0;Satellites--3;Acceleration:1,2,3";
        assert!(matches!(
            decode_line(line),
            Err(DecodeError::InvalidSatellites { .. })
        ));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let original = create_test_packet();
        let decoded = decode_line(&encode_line(&original)).unwrap();

        assert_eq!(decoded.time, original.time);
        assert_eq!(decoded.satellites, original.satellites);
        assert!((decoded.latitude - original.latitude).abs() < 1e-6);
        assert!((decoded.longitude - original.longitude).abs() < 1e-6);
        for axis in 0..3 {
            assert!((decoded.acceleration[axis] - original.acceleration[axis]).abs() < 1e-3);
        }
    }
}
