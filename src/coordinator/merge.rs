//! Merging the latest passive and active snapshots.

use crate::bluetooth::DeviceAddress;
use crate::device::snapshot::MetricValues;
use crate::device::{DeviceInfo, DeviceSnapshot, MetricKey};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latest passive data overlaid with the latest successful poll.
///
/// Active-poll values win for any metric present in both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedUpdate {
    pub address: DeviceAddress,
    pub title: String,
    pub device: DeviceInfo,
    pub signal_strength: Option<i16>,
    pub values: MetricValues,
    /// Capture time of the active snapshot that contributed, if any.
    pub polled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MergedUpdate {
    pub fn merge(passive: &DeviceSnapshot, active: Option<&DeviceSnapshot>) -> Self {
        let mut values = passive.values().clone();
        let mut device = passive.info().clone();
        let mut updated_at = passive.captured_at();

        if let Some(active) = active {
            values.extend(active.values().iter().map(|(key, value)| (*key, *value)));
            device = device.overlay(active.info());
            updated_at = updated_at.max(active.captured_at());
        }

        Self {
            address: *passive.address(),
            title: passive.title().to_string(),
            device,
            signal_strength: passive.signal_strength(),
            values,
            polled_at: active.map(DeviceSnapshot::captured_at),
            updated_at,
        }
    }

    pub fn value(&self, key: MetricKey) -> Option<f64> {
        self.values.get(&key).copied()
    }
}
