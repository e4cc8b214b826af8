//! Reachability of a device through a connectable radio.

use super::address::DeviceAddress;
use super::advertisement::AdvertisementEvent;

/// Opaque reference to a device that some radio can connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub address: DeviceAddress,
    /// Adapter that will carry the connection.
    pub adapter: String,
}

impl DeviceHandle {
    pub fn new(address: DeviceAddress, adapter: impl Into<String>) -> Self {
        Self {
            address,
            adapter: adapter.into(),
        }
    }

    /// Handle for the radio that reported `event`, if that radio is connectable.
    pub fn from_advertisement(event: &AdvertisementEvent) -> Option<Self> {
        event
            .connectable
            .then(|| Self::new(event.address, event.source.clone()))
    }
}

/// Host radio collaborator.
///
/// Advertisements may come from passive-only scanners; before polling, the
/// coordinator trades them for a handle on a radio that can connect.
pub trait RadioLink: Send + Sync {
    /// A connectable handle for `address`, or `None` when no radio has the
    /// device in range.
    fn connectable_device(&self, address: &DeviceAddress) -> Option<DeviceHandle>;
}
