//! Closed set of metrics a scale can report.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// What a metric measures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumString,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Weight,
    SignalStrength,
    Battery,
}

/// Native unit of a metric value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumString,
    Serialize, Deserialize,
)]
pub enum Unit {
    #[strum(serialize = "g")]
    #[serde(rename = "g")]
    Grams,
    #[strum(serialize = "dBm")]
    #[serde(rename = "dBm")]
    DecibelsMilliwatt,
    #[strum(serialize = "%")]
    #[serde(rename = "%")]
    Percentage,
}

/// (device class, unit) pair that identifies what a metric key means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub device_class: DeviceClass,
    pub unit: Unit,
}

impl MetricDescriptor {
    pub const fn new(device_class: DeviceClass, unit: Unit) -> Self {
        Self { device_class, unit }
    }
}

/// Named, unit-tagged metric.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumIter,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    MassGrams,
    SignalStrength,
    BatteryPercent,
}

impl MetricKey {
    pub fn descriptor(self) -> MetricDescriptor {
        match self {
            MetricKey::MassGrams => MetricDescriptor::new(DeviceClass::Weight, Unit::Grams),
            MetricKey::SignalStrength => {
                MetricDescriptor::new(DeviceClass::SignalStrength, Unit::DecibelsMilliwatt)
            }
            MetricKey::BatteryPercent => {
                MetricDescriptor::new(DeviceClass::Battery, Unit::Percentage)
            }
        }
    }

    /// Human readable entity name.
    pub fn display_name(self) -> &'static str {
        match self {
            MetricKey::MassGrams => "Weight",
            MetricKey::SignalStrength => "Signal Strength",
            MetricKey::BatteryPercent => "Battery",
        }
    }
}
