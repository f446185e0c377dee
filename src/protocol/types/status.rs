//! STATUS message type
//!
//! Notifies the receiver about the sender's current state: a numeric code,
//! a device-specific subcode, an error name and a free-text status string.

use crate::error::{IgtlError, Result};
use crate::protocol::message::Message;
use bytes::{Buf, BufMut};

const ERROR_NAME_SIZE: usize = 20;
// code (2) + subcode (8) + error name (20) + null terminator (1)
const MIN_BODY_SIZE: usize = 31;

/// STATUS message body
///
/// Wire layout (big-endian): code u16, subcode i64, error name `char[20]`
/// null-padded, status string null-terminated.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    /// Status code (0 = invalid, 1 = OK, others device-specific)
    pub code: u16,
    /// Sub-code for additional detail
    pub subcode: i64,
    /// Error name (max 20 characters)
    pub error_name: String,
    /// Free-text status string
    pub status_string: String,
}

impl StatusMessage {
    /// OK status with a message
    pub fn ok(status_string: &str) -> Self {
        StatusMessage {
            code: 1,
            subcode: 0,
            error_name: String::new(),
            status_string: status_string.to_owned(),
        }
    }

    /// Error status with a named error and a message
    pub fn error(error_name: &str, status_string: &str) -> Self {
        StatusMessage {
            code: 0,
            subcode: 0,
            error_name: error_name.to_owned(),
            status_string: status_string.to_owned(),
        }
    }
}

impl Message for StatusMessage {
    fn message_type() -> &'static str {
        "STATUS"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(MIN_BODY_SIZE + self.status_string.len());
        buf.put_u16(self.code);
        buf.put_i64(self.subcode);

        let mut name_bytes = [0u8; ERROR_NAME_SIZE];
        let name_len = self.error_name.len().min(ERROR_NAME_SIZE);
        name_bytes[..name_len].copy_from_slice(&self.error_name.as_bytes()[..name_len]);
        buf.extend_from_slice(&name_bytes);

        buf.extend_from_slice(self.status_string.as_bytes());
        buf.put_u8(0);
        Ok(buf)
    }

    fn decode_content(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_BODY_SIZE {
            return Err(IgtlError::InvalidSize {
                expected: MIN_BODY_SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = std::io::Cursor::new(data);
        let code = cursor.get_u16();
        let subcode = cursor.get_i64();

        let mut name_bytes = [0u8; ERROR_NAME_SIZE];
        cursor.copy_to_slice(&mut name_bytes);
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ERROR_NAME_SIZE);
        let error_name = String::from_utf8(name_bytes[..name_len].to_vec())?;

        let remaining = &data[cursor.position() as usize..];
        let text_len = remaining
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(remaining.len());
        let status_string = String::from_utf8(remaining[..text_len].to_vec())?;

        Ok(StatusMessage {
            code,
            subcode,
            error_name,
            status_string,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type() {
        assert_eq!(StatusMessage::message_type(), "STATUS");
    }

    #[test]
    fn test_ok_and_error_constructors() {
        let ok = StatusMessage::ok("ready");
        assert_eq!(ok.code, 1);
        assert!(ok.error_name.is_empty());

        let err = StatusMessage::error("ERR_TIMEOUT", "no response");
        assert_eq!(err.code, 0);
        assert_eq!(err.error_name, "ERR_TIMEOUT");
    }

    #[test]
    fn test_roundtrip() {
        let original = StatusMessage {
            code: 13,
            subcode: -42,
            error_name: "ERR_HARDWARE".into(),
            status_string: "probe disconnected".into(),
        };
        let encoded = original.encode_content().unwrap();
        let decoded = StatusMessage::decode_content(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_too_short() {
        assert!(StatusMessage::decode_content(&[0u8; 30]).is_err());
    }
}
