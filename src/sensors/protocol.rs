//! GATT identifiers and notification decoding for the supported peripherals.
//!
//! Two payload formats are handled:
//! - Heart Rate Measurement (0x2A37) from the standard Heart Rate Service (0x180D)
//! - Rear radar threat list from the vendor radar service (6AFF7000-...)

use thiserror::Error;
use uuid::Uuid;

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Rear radar service UUID
pub const RADAR_SERVICE_UUID: Uuid = Uuid::from_u128(0x6aff_7000_56c8_4203_9068_185c_3219_6f33);

/// Rear radar threat data characteristic UUID
pub const RADAR_DATA_UUID: Uuid = Uuid::from_u128(0x6aff_7101_56c8_4203_9068_185c_3219_6f33);

/// Client Characteristic Configuration descriptor UUID (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// Value written to the CCCD to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Size of one radar threat record: `[id, distance_m, speed]`.
pub const RADAR_THREAT_RECORD_LEN: usize = 3;

/// Errors produced while decoding a notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is shorter than its own header says it should be
    #[error("payload truncated: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Decode a Heart Rate Measurement payload into beats per minute.
///
/// Byte 0 is the flags field. When bit 0 is clear the value is a `u8` at byte 1,
/// otherwise it is a little-endian `u16` spanning bytes 1-2.
pub fn decode_heart_rate(payload: &[u8]) -> Result<u16, DecodeError> {
    let Some(&flags) = payload.first() else {
        return Err(DecodeError::Truncated {
            expected: 2,
            actual: 0,
        });
    };

    let hr_format_u16 = (flags & 0x01) != 0;

    if hr_format_u16 {
        if payload.len() < 3 {
            return Err(DecodeError::Truncated {
                expected: 3,
                actual: payload.len(),
            });
        }
        Ok(u16::from_le_bytes([payload[1], payload[2]]))
    } else {
        if payload.len() < 2 {
            return Err(DecodeError::Truncated {
                expected: 2,
                actual: payload.len(),
            });
        }
        Ok(payload[1] as u16)
    }
}

/// Decode a radar threat payload into the distance of the closest vehicle.
///
/// Byte 0 is a header and is skipped. The remainder is a sequence of 3-byte
/// records; a trailing partial record is ignored. Returns `Ok(None)` when no
/// complete record is present.
pub fn decode_radar_threats(payload: &[u8]) -> Result<Option<u8>, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Truncated {
            expected: 1,
            actual: 0,
        });
    }

    let closest = payload[1..]
        .chunks_exact(RADAR_THREAT_RECORD_LEN)
        .map(|record| record[1])
        .min();

    Ok(closest)
}
