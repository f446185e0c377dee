//! Device registry: key-to-device map plus the codec factory
//!
//! The registry owns every device of one connector and the codecs used to
//! decode/encode their content. Creation is factory-backed: a device can only
//! exist for a type string that has a registered codec, otherwise
//! `get_or_create` reports [`IgtlError::UnknownDeviceType`] and the caller
//! drops the message.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::device::content::{
    CommandCodec, ContentCodec, RawCodec, StatusCodec, TextCodec, TransformCodec,
};
use crate::device::{Device, DeviceKey, Direction};
use crate::error::{IgtlError, Result};

/// Registry of devices and content codecs for one connector
pub struct DeviceRegistry {
    devices: HashMap<DeviceKey, Device>,
    codecs: HashMap<String, Arc<dyn ContentCodec>>,
}

impl DeviceRegistry {
    /// New registry with codecs for all built-in device kinds
    ///
    /// Transform, string, status and command bodies decode into typed
    /// content; image, video, polydata and tracking-bundle bodies pass
    /// through raw for external codecs to interpret.
    pub fn new() -> Self {
        let mut registry = DeviceRegistry {
            devices: HashMap::new(),
            codecs: HashMap::new(),
        };

        registry.register_codec("TRANSFORM", Arc::new(TransformCodec));
        registry.register_codec("STATUS", Arc::new(StatusCodec));
        registry.register_codec("STRING", Arc::new(TextCodec));
        registry.register_codec("COMMAND", Arc::new(CommandCodec));
        for raw in ["IMAGE", "VIDEO", "POLYDATA", "TDATA"] {
            registry.register_codec(
                raw,
                Arc::new(RawCodec {
                    type_name: raw.to_owned(),
                }),
            );
        }

        registry
    }

    /// Register (or replace) the codec for a device-type string
    pub fn register_codec(&mut self, type_name: &str, codec: Arc<dyn ContentCodec>) {
        self.codecs.insert(type_name.to_owned(), codec);
    }

    /// Codec for a device-type string, if one is registered
    pub fn codec(&self, type_name: &str) -> Option<Arc<dyn ContentCodec>> {
        self.codecs.get(type_name).cloned()
    }

    /// Existing device for `key`, or a freshly created one
    ///
    /// The boolean is `true` when the device was created by this call.
    /// Creation requires a registered codec for the key's type string.
    pub fn get_or_create(&mut self, key: &DeviceKey) -> Result<(&mut Device, bool)> {
        if !self.codecs.contains_key(&key.device_type) {
            return Err(IgtlError::UnknownDeviceType(key.device_type.clone()));
        }

        let created = !self.devices.contains_key(key);
        if created {
            debug!(device = %key, "Creating device");
            self.devices.insert(key.clone(), Device::new(key.clone()));
        }
        Ok((self.devices.get_mut(key).unwrap(), created))
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    pub fn get_mut(&mut self, key: &DeviceKey) -> Option<&mut Device> {
        self.devices.get_mut(key)
    }

    /// Remove a device; its key may be reused later
    pub fn remove(&mut self, key: &DeviceKey) -> Option<Device> {
        self.devices.remove(key)
    }

    /// All devices with the given base type
    pub fn find_by_type(&self, device_type: &str) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| d.key().device_type == device_type)
            .collect()
    }

    /// First device with the given name, regardless of type
    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.values().find(|d| d.key().name == name)
    }

    /// Whether any outgoing device carries this name (restrict filter)
    pub fn has_outgoing_name(&self, name: &str) -> bool {
        self.devices
            .values()
            .any(|d| d.direction() == Direction::Outgoing && d.key().name == name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
