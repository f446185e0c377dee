//! Device content and the codec capability interface
//!
//! Each device kind the core understands decodes into a typed variant of
//! [`DeviceContent`]; everything else (images, video, polydata, tracking
//! bundles, custom types) passes through as [`DeviceContent::Raw`] so that
//! host-supplied codecs can interpret it. A [`ContentCodec`] is the
//! per-device-type capability the registry dispatches on.

use crate::error::{IgtlError, Result};
use crate::protocol::message::Message;
use crate::protocol::types::{CommandMessage, StatusMessage, StringMessage, TransformMessage};

/// Decoded payload of a device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceContent {
    /// No content received or assigned yet
    Empty,
    /// TRANSFORM payload
    Transform(TransformMessage),
    /// STATUS payload
    Status(StatusMessage),
    /// STRING payload
    Text(StringMessage),
    /// COMMAND payload
    Command(CommandMessage),
    /// Opaque payload for externally-decoded device types
    Raw {
        /// Base device type the payload belongs to
        type_name: String,
        /// Undecoded body bytes
        body: Vec<u8>,
    },
}

impl DeviceContent {
    pub fn is_empty(&self) -> bool {
        matches!(self, DeviceContent::Empty)
    }

    /// Command payload, if this content is one
    pub fn as_command(&self) -> Option<&CommandMessage> {
        match self {
            DeviceContent::Command(cmd) => Some(cmd),
            _ => None,
        }
    }
}

/// Capability interface between the connector core and per-type codecs
///
/// The built-in codecs cover the kinds the core itself interprets; hosts
/// register additional implementations keyed by device-type string.
pub trait ContentCodec: Send + Sync {
    /// Decode a message body into device content
    fn decode(&self, body: &[u8]) -> Result<DeviceContent>;

    /// Encode device content into a message body
    ///
    /// Fails with [`IgtlError::ContentMismatch`] when the content variant
    /// doesn't belong to this codec's device type.
    fn encode(&self, content: &DeviceContent) -> Result<Vec<u8>>;
}

macro_rules! typed_codec {
    ($codec:ident, $message:ty, $variant:ident) => {
        pub(crate) struct $codec;

        impl ContentCodec for $codec {
            fn decode(&self, body: &[u8]) -> Result<DeviceContent> {
                Ok(DeviceContent::$variant(<$message>::decode_content(body)?))
            }

            fn encode(&self, content: &DeviceContent) -> Result<Vec<u8>> {
                match content {
                    DeviceContent::$variant(msg) => msg.encode_content(),
                    _ => Err(IgtlError::ContentMismatch(
                        <$message>::message_type().to_owned(),
                    )),
                }
            }
        }
    };
}

typed_codec!(TransformCodec, TransformMessage, Transform);
typed_codec!(StatusCodec, StatusMessage, Status);
typed_codec!(TextCodec, StringMessage, Text);
typed_codec!(CommandCodec, CommandMessage, Command);

/// Passthrough codec for device types decoded outside the core
pub(crate) struct RawCodec {
    pub type_name: String,
}

impl ContentCodec for RawCodec {
    fn decode(&self, body: &[u8]) -> Result<DeviceContent> {
        Ok(DeviceContent::Raw {
            type_name: self.type_name.clone(),
            body: body.to_vec(),
        })
    }

    fn encode(&self, content: &DeviceContent) -> Result<Vec<u8>> {
        match content {
            DeviceContent::Raw { type_name, body } if *type_name == self.type_name => {
                Ok(body.clone())
            }
            _ => Err(IgtlError::ContentMismatch(self.type_name.clone())),
        }
    }
}
