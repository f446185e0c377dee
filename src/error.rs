//! Error types for connector and protocol operations
//!
//! All fallible operations in this crate return `Result<T, IgtlError>`.
//! Stream-level failures (unknown device type, malformed frame, unmatched
//! command response) are recovered inside the connector's processing tick and
//! never surface as errors from `periodic_process`; the variants here are what
//! the explicit call paths (send, decode, respond) report.

use thiserror::Error;

/// Connector/protocol error types
#[derive(Error, Debug)]
pub enum IgtlError {
    /// Invalid header format or content
    ///
    /// Raised when a type or device name exceeds its fixed field width, or a
    /// received header field is out of range.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// CRC checksum mismatch
    ///
    /// The frame is discarded; the connection itself stays up.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch {
        /// CRC declared in the message header
        expected: u64,
        /// CRC calculated from the received body
        actual: u64,
    },

    /// No codec/factory is registered for the requested device-type string
    ///
    /// Callers on the receive path treat this as "drop the message", not as a
    /// fatal condition.
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    /// Message body size doesn't match the size required by the format
    #[error("Invalid message size: expected {expected}, got {actual}")]
    InvalidSize {
        /// Expected size in bytes based on message format
        expected: usize,
        /// Actual size in bytes received or parsed
        actual: usize,
    },

    /// I/O error during network communication
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error in a text field
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Message body exceeds the maximum allowed size
    #[error("Message body too large: {size} bytes (max: {max})")]
    BodyTooLarge {
        /// Actual body size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// A command response was attempted for a command name that doesn't match
    /// the pending incoming query on that device
    ///
    /// Returned synchronously by `send_command_response`; nothing is sent.
    #[error("Command name mismatch on device {device}: pending {pending:?}, got {requested}")]
    CommandNameMismatch {
        /// Device the response was addressed to
        device: String,
        /// Name of the pending incoming command, if any
        pending: Option<String>,
        /// Name the caller tried to answer
        requested: String,
    },

    /// The operation requires an established connection
    #[error("Not connected")]
    NotConnected,

    /// No device exists for the requested key
    #[error("No device for key {0}")]
    DeviceNotFound(String),

    /// Content kind does not match what the codec for this device type expects
    #[error("Content mismatch for device type {0}")]
    ContentMismatch(String),
}

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, IgtlError>;
