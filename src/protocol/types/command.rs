//! COMMAND / RTS_COMMAND message types
//!
//! A COMMAND message transfers an XML-encoded command string referenced by a
//! numeric command ID and a short command name; the reply travels in an
//! RTS_COMMAND message with the identical body layout. The ID is what the
//! command exchange uses to correlate replies with outstanding queries.

use crate::error::{IgtlError, Result};
use crate::protocol::message::Message;
use bytes::{Buf, BufMut};

const COMMAND_NAME_SIZE: usize = 20;
// id (4) + name (20) + encoding (2) + length (4)
const FIXED_PART_SIZE: usize = 30;

/// Shared body layout of COMMAND and RTS_COMMAND messages
///
/// Wire layout (big-endian): command id u32, command name `char[20]`
/// null-padded, encoding u16 (MIBenum), length u32, command text.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    /// ID correlating a reply with its query
    pub command_id: u32,
    /// Command name (max 20 chars, truncated on encode)
    pub command_name: String,
    /// Character encoding as a MIBenum value (3 = US-ASCII, 106 = UTF-8)
    pub encoding: u16,
    /// The command text, normally XML
    pub command: String,
}

impl CommandMessage {
    /// New COMMAND body with US-ASCII encoding
    pub fn new(
        command_id: u32,
        command_name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        CommandMessage {
            command_id,
            command_name: command_name.into(),
            encoding: 3,
            command: command.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        let text = self.command.as_bytes();
        let mut buf = Vec::with_capacity(FIXED_PART_SIZE + text.len());

        buf.put_u32(self.command_id);

        let mut name_bytes = [0u8; COMMAND_NAME_SIZE];
        let name_len = self.command_name.len().min(COMMAND_NAME_SIZE - 1);
        name_bytes[..name_len].copy_from_slice(&self.command_name.as_bytes()[..name_len]);
        buf.extend_from_slice(&name_bytes);

        buf.put_u16(self.encoding);
        buf.put_u32(text.len() as u32);
        buf.extend_from_slice(text);
        Ok(buf)
    }

    fn decode_body(mut data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_PART_SIZE {
            return Err(IgtlError::InvalidSize {
                expected: FIXED_PART_SIZE,
                actual: data.len(),
            });
        }

        let command_id = data.get_u32();

        let name_bytes = &data[..COMMAND_NAME_SIZE];
        let name_len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_NAME_SIZE);
        let command_name = String::from_utf8(name_bytes[..name_len].to_vec())?;
        data.advance(COMMAND_NAME_SIZE);

        let encoding = data.get_u16();
        let length = data.get_u32() as usize;
        if data.len() < length {
            return Err(IgtlError::InvalidSize {
                expected: length,
                actual: data.len(),
            });
        }
        let command = String::from_utf8(data[..length].to_vec())?;

        Ok(CommandMessage {
            command_id,
            command_name,
            encoding,
            command,
        })
    }
}

impl Message for CommandMessage {
    fn message_type() -> &'static str {
        "COMMAND"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        self.encode_body()
    }

    fn decode_content(data: &[u8]) -> Result<Self> {
        Self::decode_body(data)
    }
}

/// RTS_COMMAND reply body: same layout as COMMAND, different type name
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponseMessage(pub CommandMessage);

impl CommandResponseMessage {
    /// New reply body answering `command_id`
    pub fn new(
        command_id: u32,
        command_name: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        CommandResponseMessage(CommandMessage::new(command_id, command_name, response))
    }
}

impl Message for CommandResponseMessage {
    fn message_type() -> &'static str {
        "RTS_COMMAND"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        self.0.encode_body()
    }

    fn decode_content(data: &[u8]) -> Result<Self> {
        Ok(CommandResponseMessage(CommandMessage::decode_body(data)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_types() {
        assert_eq!(CommandMessage::message_type(), "COMMAND");
        assert_eq!(CommandResponseMessage::message_type(), "RTS_COMMAND");
    }

    #[test]
    fn test_roundtrip_xml() {
        let xml = r#"<Command Name="StartRecording"><Param Value="1"/></Command>"#;
        let original = CommandMessage::new(7, "StartRecording", xml);
        let encoded = original.encode_content().unwrap();
        let decoded = CommandMessage::decode_content(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_response_shares_layout() {
        let response = CommandResponseMessage::new(7, "StartRecording", "<Command Status=\"SUCCESS\"/>");
        let encoded = response.encode_content().unwrap();
        // The body decodes identically as a plain command body
        let decoded = CommandMessage::decode_content(&encoded).unwrap();
        assert_eq!(decoded.command_id, 7);
        assert_eq!(decoded.command_name, "StartRecording");
    }

    #[test]
    fn test_name_truncated_to_field_width() {
        let original = CommandMessage::new(1, "AnExtremelyLongCommandNameIndeed", "x");
        let encoded = original.encode_content().unwrap();
        let decoded = CommandMessage::decode_content(&encoded).unwrap();
        assert!(decoded.command_name.len() < COMMAND_NAME_SIZE);
    }

    #[test]
    fn test_decode_truncated_text() {
        let mut encoded = CommandMessage::new(1, "CMD", "0123456789")
            .encode_content()
            .unwrap();
        encoded.truncate(FIXED_PART_SIZE + 4);
        assert!(CommandMessage::decode_content(&encoded).is_err());
    }
}
