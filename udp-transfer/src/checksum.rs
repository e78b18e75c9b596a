//! Per-frame integrity check.
//!
//! Both peers compute a CRC-32 over the payload region of every frame (the
//! header is not covered).  The parameters are the common IEEE 802.3 ones:
//! reflected polynomial `0xEDB88320`, initial value `0xFFFFFFFF`, final XOR
//! `0xFFFFFFFF`, which is exactly what [`crc32fast`] implements.

/// Reflected CRC-32 polynomial.
pub const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

/// CRC-32 of `payload`.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// `true` when `payload` hashes to `expected`.
#[inline]
pub fn verify(payload: &[u8], expected: u32) -> bool {
    checksum(payload) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise reference implementation, used to pin the parameters down.
    fn reference_crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= u32::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ CRC32_POLYNOMIAL
                } else {
                    crc >> 1
                };
            }
        }
        !crc
    }

    #[test]
    fn check_value_matches_catalogue() {
        // "123456789" is the standard CRC catalogue check input.
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn agrees_with_bitwise_reference() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1012).collect();
        assert_eq!(checksum(&data), reference_crc32(&data));
        assert_eq!(checksum(&[]), reference_crc32(&[]));
    }

    #[test]
    fn verify_rejects_other_value() {
        let c = checksum(b"payload");
        assert!(verify(b"payload", c));
        assert!(!verify(b"payloae", c));
    }
}
