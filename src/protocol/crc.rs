//! CRC-64 checksum for message bodies
//!
//! OpenIGTLink uses CRC-64/ECMA-182 (polynomial 0x42F0E1EBA9EA3693, no
//! reflection, zero init and xorout) over the message body. The table is
//! built once on first use.

use std::sync::OnceLock;

const CRC64_POLY: u64 = 0x42F0_E1EB_A9EA_3693;

static CRC64_TABLE: OnceLock<[u64; 256]> = OnceLock::new();

fn table() -> &'static [u64; 256] {
    CRC64_TABLE.get_or_init(|| {
        let mut table = [0u64; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u64) << 56;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000_0000_0000 != 0 {
                    (crc << 1) ^ CRC64_POLY
                } else {
                    crc << 1
                };
            }
            *entry = crc;
        }
        table
    })
}

/// Calculate the CRC-64 checksum of a message body
pub fn calculate_crc(data: &[u8]) -> u64 {
    let table = table();
    let mut crc: u64 = 0;
    for &byte in data {
        let index = ((crc >> 56) ^ byte as u64) & 0xFF;
        crc = (crc << 8) ^ table[index as usize];
    }
    crc
}

/// Check a message body against the CRC carried in its header
pub fn verify_crc(data: &[u8], expected: u64) -> bool {
    calculate_crc(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body() {
        assert_eq!(calculate_crc(&[]), 0);
    }

    #[test]
    fn test_deterministic() {
        let data = b"OpenIGTLink";
        assert_eq!(calculate_crc(data), calculate_crc(data));
    }

    #[test]
    fn test_sensitive_to_single_bit() {
        let a = vec![0u8; 64];
        let mut b = a.clone();
        b[17] ^= 0x01;
        assert_ne!(calculate_crc(&a), calculate_crc(&b));
    }

    #[test]
    fn test_verify() {
        let data = b"payload bytes";
        let crc = calculate_crc(data);
        assert!(verify_crc(data, crc));
        assert!(!verify_crc(data, crc ^ 1));
    }

    #[test]
    fn test_known_vector() {
        // CRC-64/ECMA-182 check value for "123456789"
        assert_eq!(calculate_crc(b"123456789"), 0x6C40_DF5F_0B49_7347);
    }
}
