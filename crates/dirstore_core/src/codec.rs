//! Entry identifier codec.
//!
//! Entry identifiers are stored as minimal big-endian byte strings: a value
//! takes 1 to 8 bytes depending on its magnitude, and only the literal value
//! 0 is written with a zero byte. Within one length bucket the byte order
//! matches the numeric order; tables holding identifiers of mixed length
//! rely on a length-first duplicate ordering to stay numeric.

use crate::error::{CoreError, CoreResult};

/// Maximum encoded length in bytes.
pub const MAX_ENCODED_LEN: usize = 8;

/// Returns how many bytes `eid` needs.
#[must_use]
pub const fn encoded_len(eid: u64) -> usize {
    match eid {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        0x100_0000..=0xFFFF_FFFF => 4,
        0x1_0000_0000..=0xFF_FFFF_FFFF => 5,
        0x100_0000_0000..=0xFFFF_FFFF_FFFF => 6,
        0x1_0000_0000_0000..=0xFF_FFFF_FFFF_FFFF => 7,
        _ => 8,
    }
}

/// Encodes an entry identifier as a minimal big-endian byte string.
#[must_use]
pub fn encode(eid: u64) -> Vec<u8> {
    eid.to_be_bytes()[MAX_ENCODED_LEN - encoded_len(eid)..].to_vec()
}

/// Decodes a big-endian entry identifier.
///
/// # Errors
///
/// Returns an error for empty input or input longer than 8 bytes.
pub fn decode(bytes: &[u8]) -> CoreResult<u64> {
    if bytes.is_empty() {
        return Err(CoreError::invalid_format("empty entry id"));
    }
    if bytes.len() > MAX_ENCODED_LEN {
        return Err(CoreError::invalid_format(format!(
            "entry id of {} bytes exceeds {MAX_ENCODED_LEN}",
            bytes.len()
        )));
    }
    Ok(bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_bucket_boundaries() {
        for x in [
            0,
            1,
            255,
            256,
            65_535,
            65_536,
            u64::from(u32::MAX),
            u64::from(u32::MAX) + 1,
            i64::MAX as u64,
            u64::MAX,
        ] {
            assert_eq!(decode(&encode(x)).unwrap(), x, "value {x}");
        }
    }

    #[test]
    fn lengths_scale_with_magnitude() {
        assert_eq!(encode(0), vec![0]);
        assert_eq!(encode(255), vec![0xFF]);
        assert_eq!(encode(256), vec![0x01, 0x00]);
        assert_eq!(encode(0xFFFF_FFFF).len(), 4);
        assert_eq!(encode(0x1_0000_0000).len(), 5);
        assert_eq!(encode(u64::MAX).len(), 8);
    }

    #[test]
    fn decode_rejects_empty_and_oversized_input() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0; 9]).is_err());
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(x: u64) {
            prop_assert_eq!(decode(&encode(x)).unwrap(), x);
        }

        #[test]
        fn byte_order_matches_numeric_order_within_a_bucket(x: u64, y: u64) {
            prop_assume!(encoded_len(x) == encoded_len(y));
            prop_assert_eq!(encode(x).cmp(&encode(y)), x.cmp(&y));
        }

        #[test]
        fn no_leading_zero_byte_except_zero(x in 1u64..) {
            prop_assert_ne!(encode(x)[0], 0);
        }
    }
}
