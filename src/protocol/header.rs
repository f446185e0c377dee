//! OpenIGTLink message header
//!
//! Every message on the wire starts with a fixed 58-byte header: version,
//! type name, device name, timestamp, body size and body CRC, all big-endian.

use crate::error::{IgtlError, Result};
use bytes::{Buf, BufMut, BytesMut};

fn trimmed_str(bytes: &[u8], what: &str) -> Result<String> {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..len])
        .map(|s| s.to_owned())
        .map_err(|_| IgtlError::InvalidHeader(format!("Invalid UTF-8 in {what}")))
}

/// Type-safe wrapper for the message type name field (12 bytes, null-padded)
///
/// Carries the full on-wire name, including any query prefix
/// (e.g. `RTS_COMMAND`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName([u8; 12]);

impl TypeName {
    /// Field width on the wire
    pub const SIZE: usize = 12;

    pub fn new(name: &str) -> Result<Self> {
        if name.len() > Self::SIZE {
            return Err(IgtlError::InvalidHeader(format!(
                "Type name too long: {} bytes (max: {})",
                name.len(),
                Self::SIZE
            )));
        }
        let mut bytes = [0u8; Self::SIZE];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(TypeName(bytes))
    }

    /// Type name with trailing null padding removed
    pub fn to_str(&self) -> Result<String> {
        trimmed_str(&self.0, "type name")
    }

    pub(crate) fn raw(&self) -> &[u8; 12] {
        &self.0
    }
}

impl From<[u8; 12]> for TypeName {
    fn from(bytes: [u8; 12]) -> Self {
        TypeName(bytes)
    }
}

/// Type-safe wrapper for the device name field (20 bytes, null-padded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName([u8; 20]);

impl DeviceName {
    /// Field width on the wire
    pub const SIZE: usize = 20;

    pub fn new(name: &str) -> Result<Self> {
        if name.len() > Self::SIZE {
            return Err(IgtlError::InvalidHeader(format!(
                "Device name too long: {} bytes (max: {})",
                name.len(),
                Self::SIZE
            )));
        }
        let mut bytes = [0u8; Self::SIZE];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(DeviceName(bytes))
    }

    /// Device name with trailing null padding removed
    pub fn to_str(&self) -> Result<String> {
        trimmed_str(&self.0, "device name")
    }

    pub(crate) fn raw(&self) -> &[u8; 20] {
        &self.0
    }
}

impl From<[u8; 20]> for DeviceName {
    fn from(bytes: [u8; 20]) -> Self {
        DeviceName(bytes)
    }
}

/// High-precision message timestamp
///
/// 64-bit wire value: upper 32 bits are seconds since the Unix epoch, lower
/// 32 bits are fractional seconds (nanoseconds * 2^32 / 10^9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub seconds: u32,
    /// Fractional seconds scaled to the full u32 range
    pub fraction: u32,
}

impl Timestamp {
    pub fn new(seconds: u32, fraction: u32) -> Self {
        Timestamp { seconds, fraction }
    }

    /// Timestamp for the current wall-clock time
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let fraction = ((now.subsec_nanos() as u64) * 0x1_0000_0000 / 1_000_000_000) as u32;
        Timestamp {
            seconds: now.as_secs() as u32,
            fraction,
        }
    }

    /// Zero timestamp (no timestamp set)
    pub fn zero() -> Self {
        Timestamp::default()
    }

    /// Pack into the 64-bit wire representation
    pub fn to_u64(self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    /// Unpack from the 64-bit wire representation
    pub fn from_u64(value: u64) -> Self {
        Timestamp {
            seconds: (value >> 32) as u32,
            fraction: (value & 0xFFFF_FFFF) as u32,
        }
    }

    /// Nanoseconds since the Unix epoch
    pub fn to_nanos(self) -> u64 {
        (self.seconds as u64) * 1_000_000_000
            + ((self.fraction as u64) * 1_000_000_000) / 0x1_0000_0000
    }

    /// Build from nanoseconds since the Unix epoch
    pub fn from_nanos(nanos: u64) -> Self {
        let seconds = (nanos / 1_000_000_000) as u32;
        let rem = nanos % 1_000_000_000;
        let fraction = (rem * 0x1_0000_0000 / 1_000_000_000) as u32;
        Timestamp { seconds, fraction }
    }

    /// Floating-point seconds since the Unix epoch
    pub fn to_f64(self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / (u32::MAX as f64 + 1.0)
    }
}

/// Fixed 58-byte message header
///
/// Layout (big-endian): version u16, type name `char[12]`, device name
/// `char[20]`, timestamp u64, body size u64, body CRC u64.
#[derive(Debug, Clone)]
pub struct Header {
    /// Protocol version (2 for OpenIGTLink version 2 and 3)
    pub version: u16,
    /// Message type name as sent on the wire
    pub type_name: TypeName,
    /// Device name identifying the stream
    pub device_name: DeviceName,
    /// Message timestamp
    pub timestamp: Timestamp,
    /// Body length in bytes
    pub body_size: u64,
    /// CRC-64 over the body
    pub crc: u64,
}

impl Header {
    /// Header size in bytes
    pub const SIZE: usize = 58;

    /// Decode a header from a byte slice of at least [`Header::SIZE`] bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(IgtlError::InvalidSize {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        let mut cursor = std::io::Cursor::new(buf);
        let version = cursor.get_u16();

        let mut type_bytes = [0u8; TypeName::SIZE];
        cursor.copy_to_slice(&mut type_bytes);

        let mut device_bytes = [0u8; DeviceName::SIZE];
        cursor.copy_to_slice(&mut device_bytes);

        let timestamp = Timestamp::from_u64(cursor.get_u64());
        let body_size = cursor.get_u64();
        let crc = cursor.get_u64();

        Ok(Header {
            version,
            type_name: TypeName::from(type_bytes),
            device_name: DeviceName::from(device_bytes),
            timestamp,
            body_size,
            crc,
        })
    }

    /// Encode the header into its 58-byte wire form
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u16(self.version);
        buf.put_slice(self.type_name.raw());
        buf.put_slice(self.device_name.raw());
        buf.put_u64(self.timestamp.to_u64());
        buf.put_u64(self.body_size);
        buf.put_u64(self.crc);
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_roundtrip() {
        let name = TypeName::new("TRANSFORM").unwrap();
        assert_eq!(name.to_str().unwrap(), "TRANSFORM");
    }

    #[test]
    fn test_type_name_too_long() {
        assert!(TypeName::new("VERY_LONG_TYPE_NAME").is_err());
    }

    #[test]
    fn test_device_name_roundtrip() {
        let name = DeviceName::new("ToolCamera").unwrap();
        assert_eq!(name.to_str().unwrap(), "ToolCamera");
    }

    #[test]
    fn test_device_name_too_long() {
        assert!(DeviceName::new("ANameLongerThanTwentyChars").is_err());
    }

    #[test]
    fn test_timestamp_now_nonzero() {
        assert!(Timestamp::now().seconds > 0);
    }

    #[test]
    fn test_timestamp_conversions() {
        let ts = Timestamp::new(1000, 0x8000_0000); // 1000.5 s
        assert_eq!(ts.to_nanos(), 1_000_500_000_000);
        assert!((ts.to_f64() - 1000.5).abs() < 1e-4);

        let back = Timestamp::from_nanos(ts.to_nanos());
        assert_eq!(back.seconds, 1000);
        assert!((back.fraction as i64 - 0x8000_0000_i64).abs() < 100);

        let wire = ts.to_u64();
        assert_eq!(Timestamp::from_u64(wire), ts);
    }

    #[test]
    fn test_header_roundtrip() {
        let original = Header {
            version: 2,
            type_name: TypeName::new("COMMAND").unwrap(),
            device_name: DeviceName::new("CommandDevice").unwrap(),
            timestamp: Timestamp::new(1234567890, 0x1234_5678),
            body_size: 30,
            crc: 0xDEAD_BEEF_CAFE_BABE,
        };

        let encoded = original.encode();
        assert_eq!(encoded.len(), Header::SIZE);

        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded.version, original.version);
        assert_eq!(decoded.type_name, original.type_name);
        assert_eq!(decoded.device_name, original.device_name);
        assert_eq!(decoded.timestamp, original.timestamp);
        assert_eq!(decoded.body_size, original.body_size);
        assert_eq!(decoded.crc, original.crc);
    }

    #[test]
    fn test_header_decode_short_buffer() {
        let result = Header::decode(&[0u8; 20]);
        assert!(matches!(result, Err(IgtlError::InvalidSize { .. })));
    }

    #[test]
    fn test_big_endian_layout() {
        let header = Header {
            version: 0x0102,
            type_name: TypeName::new("TEST").unwrap(),
            device_name: DeviceName::new("DEV").unwrap(),
            timestamp: Timestamp::from_u64(0x0102_0304_0506_0708),
            body_size: 0,
            crc: 0,
        };
        let encoded = header.encode();
        assert_eq!(&encoded[0..2], &[0x01, 0x02]);
        // timestamp starts at offset 2 + 12 + 20 = 34
        assert_eq!(&encoded[34..38], &[0x01, 0x02, 0x03, 0x04]);
    }
}
