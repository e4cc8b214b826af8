//! Discovery of supported scales from the advertisement stream.

use super::snapshot::DeviceInfo;
use crate::bluetooth::{AdvertisementEvent, DeviceAddress};
use log::info;
use std::collections::{BTreeMap, HashSet};

/// Marker every supported scale carries in its advertised local name.
const SUPPORTED_NAME_MARKER: &str = "-001";

/// A supported scale that is not configured yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub title: String,
    pub local_name: String,
}

/// Tracks which advertised devices are new, supported scales.
#[derive(Debug, Default)]
pub struct DeviceDiscovery {
    configured: HashSet<DeviceAddress>,
    discovered: BTreeMap<DeviceAddress, DiscoveredDevice>,
}

impl DeviceDiscovery {
    pub fn is_supported(event: &AdvertisementEvent) -> bool {
        event
            .local_name
            .as_deref()
            .is_some_and(|name| name.contains(SUPPORTED_NAME_MARKER))
    }

    /// Returns the device the first time a supported, unconfigured address
    /// is seen; `None` for everything else.
    pub fn observe(&mut self, event: &AdvertisementEvent) -> Option<DiscoveredDevice> {
        if self.configured.contains(&event.address) || self.discovered.contains_key(&event.address) {
            return None;
        }
        if !Self::is_supported(event) {
            return None;
        }

        let device = DiscoveredDevice {
            address: event.address,
            title: DeviceInfo::for_address(&event.address).name,
            local_name: event.local_name.clone().unwrap_or_default(),
        };
        info!(
            "[BLE] Discovered {} ({}) at {}",
            device.title, device.local_name, device.address
        );
        self.discovered.insert(event.address, device.clone());
        Some(device)
    }

    /// Move a discovered device to the configured set.
    pub fn mark_configured(&mut self, address: DeviceAddress) {
        self.discovered.remove(&address);
        self.configured.insert(address);
    }

    /// Forget a configured device so it can be discovered again.
    pub fn forget(&mut self, address: &DeviceAddress) {
        self.configured.remove(address);
        self.discovered.remove(address);
    }

    /// Discovered but unconfigured devices, ordered by address.
    pub fn discovered(&self) -> Vec<DiscoveredDevice> {
        self.discovered.values().cloned().collect()
    }
}
