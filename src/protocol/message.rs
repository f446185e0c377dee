//! Message trait, query prefixes and the generic message wrapper
//!
//! A message body type implements [`Message`]; [`IgtlMessage`] pairs it with
//! a header and owns CRC stamping on encode and CRC verification on decode.

use crate::error::{IgtlError, Result};
use crate::protocol::crc::calculate_crc;
use crate::protocol::header::{DeviceName, Header, Timestamp, TypeName};

/// Common interface for message body types
pub trait Message: Sized {
    /// Base message type name (e.g. "TRANSFORM", "COMMAND")
    fn message_type() -> &'static str;

    /// Encode the body content to bytes (without header)
    fn encode_content(&self) -> Result<Vec<u8>>;

    /// Decode the body content from bytes (without header)
    fn decode_content(data: &[u8]) -> Result<Self>;
}

/// Query prefix mangled into the on-wire type name
///
/// A `GET_`/`STT_`/`STP_` prefix turns a data type into a query for it; an
/// `RTS_` prefix marks the reply. [`MessagePrefix::split`] recovers the
/// prefix and base type from an inbound type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePrefix {
    /// Plain data message, no prefix
    NotDefined,
    /// Single-value query
    Get,
    /// Start-streaming request
    Start,
    /// Stop-streaming request
    Stop,
    /// Reply to a query
    Rts,
}

impl MessagePrefix {
    fn as_wire(&self) -> &'static str {
        match self {
            MessagePrefix::NotDefined => "",
            MessagePrefix::Get => "GET_",
            MessagePrefix::Start => "STT_",
            MessagePrefix::Stop => "STP_",
            MessagePrefix::Rts => "RTS_",
        }
    }

    /// Prepend this prefix to a base type name
    pub fn apply(&self, base_type: &str) -> String {
        format!("{}{}", self.as_wire(), base_type)
    }

    /// Split an on-wire type name into its prefix and base type
    pub fn split(type_name: &str) -> (MessagePrefix, &str) {
        for prefix in [
            MessagePrefix::Get,
            MessagePrefix::Start,
            MessagePrefix::Stop,
            MessagePrefix::Rts,
        ] {
            if let Some(base) = type_name.strip_prefix(prefix.as_wire()) {
                return (prefix, base);
            }
        }
        (MessagePrefix::NotDefined, type_name)
    }
}

/// Complete message: header plus typed body
#[derive(Debug)]
pub struct IgtlMessage<T: Message> {
    /// Message header (58 bytes)
    pub header: Header,
    /// Message body content
    pub content: T,
}

impl<T: Message> IgtlMessage<T> {
    /// Create a new message for `device_name` with a fresh timestamp
    pub fn new(content: T, device_name: &str) -> Result<Self> {
        Self::with_type_name(content, device_name, T::message_type())
    }

    /// Create a new message with an explicit on-wire type name
    ///
    /// Used when sending query/reply variants of a body type
    /// (e.g. `RTS_COMMAND` carries the COMMAND body layout).
    pub fn with_type_name(content: T, device_name: &str, type_name: &str) -> Result<Self> {
        let body_size = content.encode_content()?.len() as u64;
        let header = Header {
            version: 2,
            type_name: TypeName::new(type_name)?,
            device_name: DeviceName::new(device_name)?,
            timestamp: Timestamp::now(),
            body_size,
            crc: 0, // stamped during encode
        };
        Ok(IgtlMessage { header, content })
    }

    /// Encode the complete message (header + body) to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = self.content.encode_content()?;

        let mut header = self.header.clone();
        header.body_size = body.len() as u64;
        header.crc = calculate_crc(&body);

        let mut buf = Vec::with_capacity(Header::SIZE + body.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a complete message, verifying the body CRC
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with_options(data, true)
    }

    /// Decode a complete message with optional CRC verification
    pub fn decode_with_options(data: &[u8], verify_crc: bool) -> Result<Self> {
        if data.len() < Header::SIZE {
            return Err(IgtlError::InvalidSize {
                expected: Header::SIZE,
                actual: data.len(),
            });
        }

        let header = Header::decode(&data[..Header::SIZE])?;
        let body_end = Header::SIZE + header.body_size as usize;
        if data.len() < body_end {
            return Err(IgtlError::InvalidSize {
                expected: body_end,
                actual: data.len(),
            });
        }

        let body = &data[Header::SIZE..body_end];
        if verify_crc {
            let actual = calculate_crc(body);
            if actual != header.crc {
                return Err(IgtlError::CrcMismatch {
                    expected: header.crc,
                    actual,
                });
            }
        }

        let content = T::decode_content(body)?;
        Ok(IgtlMessage { header, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{StatusMessage, TransformMessage};

    #[test]
    fn test_prefix_apply_split() {
        assert_eq!(MessagePrefix::Rts.apply("COMMAND"), "RTS_COMMAND");
        assert_eq!(MessagePrefix::NotDefined.apply("IMAGE"), "IMAGE");

        let (prefix, base) = MessagePrefix::split("RTS_COMMAND");
        assert_eq!(prefix, MessagePrefix::Rts);
        assert_eq!(base, "COMMAND");

        let (prefix, base) = MessagePrefix::split("TRANSFORM");
        assert_eq!(prefix, MessagePrefix::NotDefined);
        assert_eq!(base, "TRANSFORM");

        let (prefix, base) = MessagePrefix::split("GET_STATUS");
        assert_eq!(prefix, MessagePrefix::Get);
        assert_eq!(base, "STATUS");
    }

    #[test]
    fn test_roundtrip_transform() {
        let transform = TransformMessage::identity();
        let msg = IgtlMessage::new(transform.clone(), "Tracker").unwrap();

        let encoded = msg.encode().unwrap();
        let decoded = IgtlMessage::<TransformMessage>::decode(&encoded).unwrap();

        assert_eq!(decoded.header.type_name.to_str().unwrap(), "TRANSFORM");
        assert_eq!(decoded.header.device_name.to_str().unwrap(), "Tracker");
        assert_eq!(decoded.content, transform);
    }

    #[test]
    fn test_explicit_type_name() {
        let status = StatusMessage::ok("ready");
        let msg = IgtlMessage::with_type_name(status, "Dev", "GET_STATUS").unwrap();
        let encoded = msg.encode().unwrap();
        let decoded = IgtlMessage::<StatusMessage>::decode(&encoded).unwrap();
        assert_eq!(decoded.header.type_name.to_str().unwrap(), "GET_STATUS");
    }

    #[test]
    fn test_crc_detects_corruption() {
        let msg = IgtlMessage::new(StatusMessage::ok("ok"), "Dev").unwrap();
        let mut encoded = msg.encode().unwrap();
        encoded[Header::SIZE] ^= 0xFF;

        let result = IgtlMessage::<StatusMessage>::decode(&encoded);
        assert!(matches!(result, Err(IgtlError::CrcMismatch { .. })));

        // Verification can be switched off for trusted transports
        assert!(IgtlMessage::<StatusMessage>::decode_with_options(&encoded, false).is_ok());
    }

    #[test]
    fn test_decode_truncated() {
        let msg = IgtlMessage::new(StatusMessage::ok("ok"), "Dev").unwrap();
        let encoded = msg.encode().unwrap();
        let result = IgtlMessage::<StatusMessage>::decode(&encoded[..encoded.len() - 4]);
        assert!(matches!(result, Err(IgtlError::InvalidSize { .. })));
    }
}
