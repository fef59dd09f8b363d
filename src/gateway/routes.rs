//! Downlink routing table.
//!
//! Maps a device address to the identifier the radio network server knows
//! the device by (its devEUI). A device without an entry cannot receive
//! downlink messages.

use std::collections::HashMap;

use crate::codec::{DeviceAddress, InvalidAddress};

#[derive(Debug, Clone, Default)]
pub struct DeviceRoutes {
    by_device: HashMap<DeviceAddress, String>,
}

impl DeviceRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from the `[devices]` configuration section.
    pub fn from_settings(devices: &HashMap<String, String>) -> Result<Self, InvalidAddress> {
        let mut routes = Self::new();
        for (device, network_id) in devices {
            routes.insert(device.parse()?, network_id);
        }
        Ok(routes)
    }

    /// Network ids are compared case-insensitively and stored lowercase.
    pub fn insert(&mut self, device: DeviceAddress, network_id: impl AsRef<str>) -> Option<String> {
        self.by_device
            .insert(device, network_id.as_ref().to_ascii_lowercase())
    }

    pub fn get(&self, device: &DeviceAddress) -> Option<&str> {
        self.by_device.get(device).map(String::as_str)
    }

    /// Reverse lookup, used to name the device an envelope came from.
    pub fn device_for(&self, network_id: &str) -> Option<DeviceAddress> {
        self.by_device
            .iter()
            .find(|(_, id)| id.eq_ignore_ascii_case(network_id))
            .map(|(device, _)| *device)
    }

    pub fn len(&self) -> usize {
        self.by_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_device.is_empty()
    }
}
