//! Payload checksum.

use crc::{CRC_32_ISO_HDLC, Crc};

/// Reflected CRC-32, polynomial 0xEDB88320 (zlib / IEEE 802.3).
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 over the exact payload bytes written after the header.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bitwise reference implementation.
    fn reference_crc32(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;
        for &byte in data {
            crc ^= byte as u32;
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
        !crc
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_matches_reference() {
        let inputs: [Vec<u8>; 4] = [
            vec![0u8; 256],
            vec![0xFFu8; 1000],
            (0..=255u8).collect(),
            b"M_425 system info".to_vec(),
        ];
        for input in inputs.iter() {
            assert_eq!(crc32(input), reference_crc32(input));
        }
    }
}
