//! Message body types understood by the connector core
//!
//! Only the bodies the core itself must interpret live here: transforms for
//! tracking streams, status and string for control traffic, and the
//! COMMAND/RTS_COMMAND pair that drives the command exchange. Heavy numeric
//! content (images, video, polydata, tracking bundles) flows through the
//! connector as opaque payloads decoded by externally-registered codecs.

pub mod command;
pub mod status;
pub mod string;
pub mod transform;

pub use command::{CommandMessage, CommandResponseMessage};
pub use status::StatusMessage;
pub use string::{StringMessage, ENCODING_US_ASCII, ENCODING_UTF8};
pub use transform::TransformMessage;
