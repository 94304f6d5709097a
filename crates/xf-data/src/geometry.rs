//! Binary point codec
//!
//! A point record is 21 bytes: a byte-order flag (`0` big endian, `1`
//! little endian), a 4-byte geometry type tag (`1` = point), then X and Y as
//! IEEE-754 doubles. The flag applies to every multi-byte field.

/// Length of an encoded 2D point
pub const POINT_RECORD_LEN: usize = 21;

const POINT_TYPE: u32 = 1;

/// Byte order of an encoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Decode a point record into `(lon, lat)`.
///
/// Returns `None` for empty, truncated or oversized input, an unknown
/// byte-order flag, or any geometry type other than a 2D point.
pub fn decode_point(bytes: &[u8]) -> Option<(f64, f64)> {
    if bytes.len() != POINT_RECORD_LEN {
        return None;
    }
    let order = match bytes[0] {
        0 => ByteOrder::Big,
        1 => ByteOrder::Little,
        _ => return None,
    };

    let tag: [u8; 4] = bytes[1..5].try_into().ok()?;
    let tag = match order {
        ByteOrder::Little => u32::from_le_bytes(tag),
        ByteOrder::Big => u32::from_be_bytes(tag),
    };
    if tag != POINT_TYPE {
        return None;
    }

    Some((read_f64(&bytes[5..13], order)?, read_f64(&bytes[13..21], order)?))
}

fn read_f64(bytes: &[u8], order: ByteOrder) -> Option<f64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(match order {
        ByteOrder::Little => f64::from_le_bytes(raw),
        ByteOrder::Big => f64::from_be_bytes(raw),
    })
}

/// Encode `(lon, lat)` as a little-endian point record
pub fn encode_point(lon: f64, lat: f64) -> [u8; POINT_RECORD_LEN] {
    encode_point_with(lon, lat, ByteOrder::Little)
}

pub fn encode_point_with(lon: f64, lat: f64, order: ByteOrder) -> [u8; POINT_RECORD_LEN] {
    let mut out = [0u8; POINT_RECORD_LEN];
    match order {
        ByteOrder::Little => {
            out[0] = 1;
            out[1..5].copy_from_slice(&POINT_TYPE.to_le_bytes());
            out[5..13].copy_from_slice(&lon.to_le_bytes());
            out[13..21].copy_from_slice(&lat.to_le_bytes());
        }
        ByteOrder::Big => {
            out[0] = 0;
            out[1..5].copy_from_slice(&POINT_TYPE.to_be_bytes());
            out[5..13].copy_from_slice(&lon.to_be_bytes());
            out[13..21].copy_from_slice(&lat.to_be_bytes());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_both_byte_orders() {
        for &(lon, lat) in &[(-120.0, 38.0), (179.999999, -89.5), (0.0, 0.0), (-98.5, 39.8)] {
            for order in [ByteOrder::Little, ByteOrder::Big] {
                let (x, y) = decode_point(&encode_point_with(lon, lat, order)).unwrap();
                assert!((x - lon).abs() < 1e-9);
                assert!((y - lat).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_truncated_and_empty_input() {
        let record = encode_point(-120.0, 38.0);
        assert_eq!(decode_point(&[]), None);
        for len in 1..POINT_RECORD_LEN {
            assert_eq!(decode_point(&record[..len]), None);
        }
    }

    #[test]
    fn test_rejects_other_geometry_and_bad_flag() {
        let mut line = encode_point(1.0, 2.0);
        line[1] = 2;
        assert_eq!(decode_point(&line), None);

        let mut flag = encode_point(1.0, 2.0);
        flag[0] = 7;
        assert_eq!(decode_point(&flag), None);

        let mut long = encode_point(1.0, 2.0).to_vec();
        long.push(0);
        assert_eq!(decode_point(&long), None);
    }

    #[test]
    fn test_matches_reference_layout() {
        // POINT(1 2), little endian
        let bytes = [
            0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40,
        ];
        assert_eq!(decode_point(&bytes), Some((1.0, 2.0)));
        assert_eq!(encode_point(1.0, 2.0), bytes);
    }
}
