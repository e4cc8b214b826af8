//! Entity descriptions for the metrics a scale reports.

use crate::device::{DeviceClass, MetricDescriptor, Unit};
use serde::Serialize;
use strum::{AsRefStr, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Diagnostic,
}

/// Display metadata for one kind of entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescription {
    /// Stable key, unique per device (`weight_g`).
    pub key: &'static str,
    pub device_class: DeviceClass,
    pub unit: Unit,
    pub state_class: StateClass,
    pub enabled_by_default: bool,
    pub entity_category: Option<EntityCategory>,
}

impl EntityDescription {
    pub fn descriptor(&self) -> MetricDescriptor {
        MetricDescriptor::new(self.device_class, self.unit)
    }
}

pub const WEIGHT: EntityDescription = EntityDescription {
    key: "weight_g",
    device_class: DeviceClass::Weight,
    unit: Unit::Grams,
    state_class: StateClass::Measurement,
    enabled_by_default: true,
    entity_category: None,
};

pub const SIGNAL_STRENGTH: EntityDescription = EntityDescription {
    key: "signal_strength_dBm",
    device_class: DeviceClass::SignalStrength,
    unit: Unit::DecibelsMilliwatt,
    state_class: StateClass::Measurement,
    enabled_by_default: false,
    entity_category: Some(EntityCategory::Diagnostic),
};

pub const BATTERY: EntityDescription = EntityDescription {
    key: "battery_%",
    device_class: DeviceClass::Battery,
    unit: Unit::Percentage,
    state_class: StateClass::Measurement,
    enabled_by_default: true,
    entity_category: Some(EntityCategory::Diagnostic),
};

/// Primary readings, for the sensor platform.
pub const SENSOR_DESCRIPTIONS: &[EntityDescription] = &[WEIGHT];

/// Link and power readings, for the diagnostics platform.
pub const DIAGNOSTIC_DESCRIPTIONS: &[EntityDescription] = &[SIGNAL_STRENGTH, BATTERY];

/// Look up the description for a (device class, unit) pair.
pub fn entity_description(descriptor: MetricDescriptor) -> Option<&'static EntityDescription> {
    match (descriptor.device_class, descriptor.unit) {
        (DeviceClass::Weight, Unit::Grams) => Some(&WEIGHT),
        (DeviceClass::SignalStrength, Unit::DecibelsMilliwatt) => Some(&SIGNAL_STRENGTH),
        (DeviceClass::Battery, Unit::Percentage) => Some(&BATTERY),
        _ => None,
    }
}
