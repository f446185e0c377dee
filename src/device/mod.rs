//! Devices: named, typed message streams multiplexed over one connector
//!
//! A device represents one stream such as `IMAGE:ToolCamera`; its identity
//! is the [`DeviceKey`] (type + name), its payload a [`DeviceContent`]. The
//! connector creates incoming devices on first sight of a matching header;
//! host adapters create outgoing devices when they register something to
//! publish.

pub mod content;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::header::Timestamp;

pub use content::{ContentCodec, DeviceContent};
pub use registry::DeviceRegistry;

/// Closed set of device kinds plus an open extension point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Image,
    Transform,
    String,
    Status,
    Command,
    Video,
    PolyData,
    TrackingBundle,
    /// Any type string outside the closed set
    Custom(std::string::String),
}

impl DeviceKind {
    /// Map an on-wire base type name to a kind
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "IMAGE" => DeviceKind::Image,
            "TRANSFORM" => DeviceKind::Transform,
            "STRING" => DeviceKind::String,
            "STATUS" => DeviceKind::Status,
            "COMMAND" => DeviceKind::Command,
            "VIDEO" => DeviceKind::Video,
            "POLYDATA" => DeviceKind::PolyData,
            "TDATA" => DeviceKind::TrackingBundle,
            other => DeviceKind::Custom(other.to_owned()),
        }
    }

    /// On-wire base type name for this kind
    pub fn type_name(&self) -> &str {
        match self {
            DeviceKind::Image => "IMAGE",
            DeviceKind::Transform => "TRANSFORM",
            DeviceKind::String => "STRING",
            DeviceKind::Status => "STATUS",
            DeviceKind::Command => "COMMAND",
            DeviceKind::Video => "VIDEO",
            DeviceKind::PolyData => "POLYDATA",
            DeviceKind::TrackingBundle => "TDATA",
            DeviceKind::Custom(name) => name,
        }
    }
}

/// Identity of a device within one connector: `(type, name)`
///
/// Immutable once the device exists; equality covers both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Base device type string (no query prefix)
    pub device_type: String,
    /// Device name from the message header
    pub name: String,
}

impl DeviceKey {
    pub fn new(device_type: impl Into<String>, name: impl Into<String>) -> Self {
        DeviceKey {
            device_type: device_type.into(),
            name: name.into(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_type_name(&self.device_type)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_type, self.name)
    }
}

/// Role of a device relative to this connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Created but not yet assigned a role
    #[default]
    Unspecified,
    /// Content arrives from the peer
    Incoming,
    /// Content is published to the peer
    Outgoing,
}

/// One metadata entry: value plus its MIBenum character encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaValue {
    /// MIBenum character encoding of the value
    pub encoding: u16,
    /// The metadata value
    pub value: String,
}

/// One named, typed message stream
#[derive(Debug)]
pub struct Device {
    key: DeviceKey,
    direction: Direction,
    content: DeviceContent,
    visible: bool,
    metadata: BTreeMap<String, MetaValue>,
    last_modified: Timestamp,
    pending_send: bool,
}

impl Device {
    pub fn new(key: DeviceKey) -> Self {
        Device {
            key,
            direction: Direction::Unspecified,
            content: DeviceContent::Empty,
            visible: true,
            metadata: BTreeMap::new(),
            last_modified: Timestamp::zero(),
            pending_send: false,
        }
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    pub fn kind(&self) -> DeviceKind {
        self.key.kind()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Assign a role to a device that doesn't have one yet
    ///
    /// The direction is fixed at first assignment; a later attempt to change
    /// it is ignored and reported as `false`.
    pub fn assign_direction(&mut self, direction: Direction) -> bool {
        match (self.direction, direction) {
            (_, Direction::Unspecified) => false,
            (Direction::Unspecified, _) => {
                self.direction = direction;
                true
            }
            (current, requested) => current == requested,
        }
    }

    pub fn content(&self) -> &DeviceContent {
        &self.content
    }

    /// Replace the content, stamp the modification time and mark the device
    /// for the outgoing flush
    pub fn set_content(&mut self, content: DeviceContent) {
        self.content = content;
        self.last_modified = Timestamp::now();
        self.pending_send = true;
    }

    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Whether the content changed since the last outgoing flush
    pub fn pending_send(&self) -> bool {
        self.pending_send
    }

    pub(crate) fn mark_flushed(&mut self) {
        self.pending_send = false;
    }

    pub(crate) fn mark_pending(&mut self) {
        self.pending_send = true;
    }

    pub fn set_meta(&mut self, name: impl Into<String>, encoding: u16, value: impl Into<String>) {
        self.metadata.insert(
            name.into(),
            MetaValue {
                encoding,
                value: value.into(),
            },
        );
    }

    pub fn meta(&self, name: &str) -> Option<&MetaValue> {
        self.metadata.get(name)
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetaValue> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::StringMessage;

    #[test]
    fn test_kind_roundtrip() {
        for name in [
            "IMAGE", "TRANSFORM", "STRING", "STATUS", "COMMAND", "VIDEO", "POLYDATA", "TDATA",
        ] {
            assert_eq!(DeviceKind::from_type_name(name).type_name(), name);
        }
        let custom = DeviceKind::from_type_name("SENSOR");
        assert_eq!(custom, DeviceKind::Custom("SENSOR".into()));
        assert_eq!(custom.type_name(), "SENSOR");
    }

    #[test]
    fn test_key_display() {
        let key = DeviceKey::new("IMAGE", "ToolCamera");
        assert_eq!(key.to_string(), "IMAGE:ToolCamera");
    }

    #[test]
    fn test_direction_fixed_after_assignment() {
        let mut device = Device::new(DeviceKey::new("STRING", "Notes"));
        assert_eq!(device.direction(), Direction::Unspecified);

        assert!(device.assign_direction(Direction::Incoming));
        assert_eq!(device.direction(), Direction::Incoming);

        // Re-assigning the same role is fine, flipping it is not
        assert!(device.assign_direction(Direction::Incoming));
        assert!(!device.assign_direction(Direction::Outgoing));
        assert_eq!(device.direction(), Direction::Incoming);
    }

    #[test]
    fn test_set_content_marks_pending() {
        let mut device = Device::new(DeviceKey::new("STRING", "Notes"));
        assert!(!device.pending_send());

        device.set_content(DeviceContent::Text(StringMessage::new("hello")));
        assert!(device.pending_send());
        assert!(device.last_modified().seconds > 0);

        device.mark_flushed();
        assert!(!device.pending_send());
    }

    #[test]
    fn test_metadata() {
        let mut device = Device::new(DeviceKey::new("IMAGE", "Probe"));
        device.set_meta("patient", 106, "anonymous");
        assert_eq!(device.meta("patient").unwrap().value, "anonymous");
        assert!(device.meta("missing").is_none());
    }
}
