//! STRING message type
//!
//! Transfers a character string of up to 65535 bytes with a MIBenum
//! character-encoding tag.

use crate::error::{IgtlError, Result};
use crate::protocol::message::Message;
use bytes::{Buf, BufMut};

/// MIBenum value for US-ASCII
pub const ENCODING_US_ASCII: u16 = 3;
/// MIBenum value for UTF-8
pub const ENCODING_UTF8: u16 = 106;

/// STRING message body
///
/// Wire layout (big-endian): encoding u16, length u16, string bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct StringMessage {
    /// Character encoding as a MIBenum value
    pub encoding: u16,
    /// The text content
    pub string: String,
}

impl StringMessage {
    /// New STRING message with US-ASCII encoding
    pub fn new(string: impl Into<String>) -> Self {
        StringMessage {
            encoding: ENCODING_US_ASCII,
            string: string.into(),
        }
    }

    /// New STRING message with UTF-8 encoding
    pub fn utf8(string: impl Into<String>) -> Self {
        StringMessage {
            encoding: ENCODING_UTF8,
            string: string.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }
}

impl Message for StringMessage {
    fn message_type() -> &'static str {
        "STRING"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let bytes = self.string.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(IgtlError::BodyTooLarge {
                size: bytes.len(),
                max: u16::MAX as usize,
            });
        }

        let mut buf = Vec::with_capacity(4 + bytes.len());
        buf.put_u16(self.encoding);
        buf.put_u16(bytes.len() as u16);
        buf.extend_from_slice(bytes);
        Ok(buf)
    }

    fn decode_content(mut data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(IgtlError::InvalidSize {
                expected: 4,
                actual: data.len(),
            });
        }

        let encoding = data.get_u16();
        let length = data.get_u16() as usize;
        if data.len() < length {
            return Err(IgtlError::InvalidSize {
                expected: length,
                actual: data.len(),
            });
        }

        let string = String::from_utf8(data[..length].to_vec())?;
        Ok(StringMessage { encoding, string })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type() {
        assert_eq!(StringMessage::message_type(), "STRING");
    }

    #[test]
    fn test_roundtrip() {
        let original = StringMessage::utf8("こんにちは");
        let encoded = original.encode_content().unwrap();
        let decoded = StringMessage::decode_content(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_empty_string() {
        let encoded = StringMessage::new("").encode_content().unwrap();
        assert_eq!(encoded.len(), 4);
        let decoded = StringMessage::decode_content(&encoded).unwrap();
        assert!(decoded.string.is_empty());
    }

    #[test]
    fn test_truncated_body() {
        let mut encoded = StringMessage::new("hello world").encode_content().unwrap();
        encoded.truncate(8);
        assert!(StringMessage::decode_content(&encoded).is_err());
    }
}
