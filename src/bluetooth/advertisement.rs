//! Passive advertisement events delivered by the host scanner.

use super::address::DeviceAddress;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// One advertisement as seen by one radio.
#[derive(Debug, Clone)]
pub struct AdvertisementEvent {
    pub address: DeviceAddress,
    /// Advertised local name, if the packet carried one.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Raw vendor payload (manufacturer data without the company id).
    pub payload: Vec<u8>,
    /// Whether the reporting radio can also open a connection.
    pub connectable: bool,
    /// Adapter that reported the packet (e.g. `hci0`).
    pub source: String,
    /// Monotonic receive time, used for poll scheduling.
    pub received_at: Instant,
    /// Wall-clock receive time, used for published updates.
    pub timestamp: DateTime<Utc>,
}

impl AdvertisementEvent {
    pub fn new(address: DeviceAddress, rssi: i16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            local_name: None,
            rssi,
            payload: payload.into(),
            connectable: true,
            source: "hci0".to_string(),
            received_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }

    pub fn with_connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}
