//! OpenIGTLink wire-format implementation
//!
//! Header, CRC, the message trait and the body types the connector core
//! understands.

pub mod crc;
pub mod header;
pub mod message;
pub mod types;

pub use crc::{calculate_crc, verify_crc};
pub use header::{DeviceName, Header, Timestamp, TypeName};
pub use message::{IgtlMessage, Message, MessagePrefix};
