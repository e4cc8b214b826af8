//! Normalised sensor snapshots.

use super::metrics::MetricKey;
use crate::bluetooth::DeviceAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metric values keyed by metric. Keys are unique by construction.
pub type MetricValues = BTreeMap<MetricKey, f64>;

/// Static device metadata shown to the host device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub sw_version: Option<String>,
    pub hw_version: Option<String>,
}

impl DeviceInfo {
    /// Default identity for a Renpho scale at `address`.
    pub fn for_address(address: &DeviceAddress) -> Self {
        Self {
            name: format!("Renpho {}", address.short_address()),
            manufacturer: "Renpho".to_string(),
            model: "Renpho".to_string(),
            sw_version: None,
            hw_version: None,
        }
    }

    /// Overlay `newer` on top of `self`; versions only move forward when
    /// `newer` actually carries them.
    pub fn overlay(&self, newer: &DeviceInfo) -> DeviceInfo {
        DeviceInfo {
            name: newer.name.clone(),
            manufacturer: newer.manufacturer.clone(),
            model: newer.model.clone(),
            sw_version: newer.sw_version.clone().or_else(|| self.sw_version.clone()),
            hw_version: newer.hw_version.clone().or_else(|| self.hw_version.clone()),
        }
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Advertisement,
    Poll,
}

/// Immutable result of decoding one advertisement or one poll.
///
/// A snapshot is never mutated after construction; the next one for the
/// same device supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    address: DeviceAddress,
    title: String,
    info: DeviceInfo,
    signal_strength: Option<i16>,
    values: MetricValues,
    source: SnapshotSource,
    captured_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    pub(crate) fn new(
        address: DeviceAddress,
        source: SnapshotSource,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let info = DeviceInfo::for_address(&address);
        Self {
            address,
            title: info.name.clone(),
            info,
            signal_strength: None,
            values: MetricValues::new(),
            source,
            captured_at,
        }
    }

    pub(crate) fn with_signal_strength(mut self, rssi: i16) -> Self {
        self.signal_strength = Some(rssi);
        self.values.insert(MetricKey::SignalStrength, f64::from(rssi));
        self
    }

    pub(crate) fn with_value(mut self, key: MetricKey, value: f64) -> Self {
        self.values.insert(key, value);
        self
    }

    pub(crate) fn with_sw_version(mut self, version: impl Into<String>) -> Self {
        self.info.sw_version = Some(version.into());
        self
    }

    pub(crate) fn with_hw_version(mut self, version: impl Into<String>) -> Self {
        self.info.hw_version = Some(version.into());
        self
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn signal_strength(&self) -> Option<i16> {
        self.signal_strength
    }

    pub fn values(&self) -> &MetricValues {
        &self.values
    }

    pub fn value(&self, key: MetricKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn source(&self) -> SnapshotSource {
        self.source
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

/// Raw characteristic values read during one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReadout {
    characteristics: BTreeMap<Uuid, Vec<u8>>,
}

impl PollReadout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uuid: Uuid, value: Vec<u8>) {
        self.characteristics.insert(uuid, value);
    }

    pub fn with(mut self, uuid: Uuid, value: impl Into<Vec<u8>>) -> Self {
        self.insert(uuid, value.into());
        self
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&[u8]> {
        self.characteristics.get(uuid).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.characteristics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characteristics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> DeviceAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_default_identity() {
        let snapshot = DeviceSnapshot::new(address(), SnapshotSource::Advertisement, Utc::now());
        assert_eq!(snapshot.title(), "Renpho EEFF");
        assert_eq!(snapshot.info().manufacturer, "Renpho");
        assert!(snapshot.values().is_empty());
    }

    #[test]
    fn test_signal_strength_is_also_a_metric() {
        let snapshot = DeviceSnapshot::new(address(), SnapshotSource::Advertisement, Utc::now())
            .with_signal_strength(-60);
        assert_eq!(snapshot.signal_strength(), Some(-60));
        assert_eq!(snapshot.value(MetricKey::SignalStrength), Some(-60.0));
    }

    #[test]
    fn test_info_overlay_keeps_known_versions() {
        let old = DeviceInfo {
            sw_version: Some("1.2".to_string()),
            ..DeviceInfo::for_address(&address())
        };
        let newer = DeviceInfo {
            hw_version: Some("B".to_string()),
            ..DeviceInfo::for_address(&address())
        };
        let merged = old.overlay(&newer);
        assert_eq!(merged.sw_version.as_deref(), Some("1.2"));
        assert_eq!(merged.hw_version.as_deref(), Some("B"));
    }
}
