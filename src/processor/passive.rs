//! Entity view over a device's merged updates.

use super::descriptions::{
    DIAGNOSTIC_DESCRIPTIONS, EntityCategory, EntityDescription, SENSOR_DESCRIPTIONS, StateClass,
    entity_description,
};
use crate::bluetooth::DeviceAddress;
use crate::coordinator::{MergedUpdate, Publisher};
use crate::device::{DeviceClass, DeviceInfo, MetricDescriptor, MetricKey, Unit};
use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one metric of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityKey {
    pub key: String,
    pub device_id: DeviceAddress,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.key)
    }
}

/// Current value of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_key: EntityKey,
    pub name: String,
    pub value: f64,
    pub device_class: DeviceClass,
    pub unit: Unit,
    pub state_class: StateClass,
    pub entity_category: Option<EntityCategory>,
    pub updated_at: DateTime<Utc>,
}

/// Entity states derived from one merged update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorUpdate {
    pub address: DeviceAddress,
    pub device: DeviceInfo,
    pub states: Vec<EntityState>,
}

/// Entity that a processor reports for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub entity_key: EntityKey,
    pub name: String,
    pub description: &'static EntityDescription,
}

pub type ListenerId = u64;
type UpdateListener = Arc<dyn Fn(&ProcessorUpdate) + Send + Sync>;
type EntitiesListener = Arc<dyn Fn(&[NewEntity]) + Send + Sync>;

#[derive(Default)]
struct Entities {
    states: BTreeMap<EntityKey, EntityState>,
    devices: HashMap<DeviceAddress, DeviceInfo>,
}

#[derive(Default)]
struct Listeners {
    updates: Vec<(ListenerId, UpdateListener)>,
    entities: Vec<(ListenerId, EntitiesListener)>,
}

/// Converts merged updates into entity states for one platform.
///
/// Only metrics whose descriptor matches one of the processor's
/// descriptions become entities; everything else is dropped silently.
pub struct PassiveDataProcessor {
    name: &'static str,
    descriptions: &'static [EntityDescription],
    entities: RwLock<Entities>,
    listeners: RwLock<Listeners>,
    next_listener: AtomicU64,
}

impl PassiveDataProcessor {
    pub fn new(name: &'static str, descriptions: &'static [EntityDescription]) -> Self {
        Self {
            name,
            descriptions,
            entities: RwLock::new(Entities::default()),
            listeners: RwLock::new(Listeners::default()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Processor for the primary readings.
    pub fn sensors() -> Self {
        Self::new("sensor", SENSOR_DESCRIPTIONS)
    }

    /// Processor for signal strength and battery.
    pub fn diagnostics() -> Self {
        Self::new("diagnostic", DIAGNOSTIC_DESCRIPTIONS)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The description for `descriptor`, if this processor handles it.
    fn description(&self, descriptor: MetricDescriptor) -> Option<&'static EntityDescription> {
        entity_description(descriptor).filter(|d| self.descriptions.contains(*d))
    }

    pub fn on_merged_update(&self, update: &MergedUpdate) {
        let mut states = Vec::new();
        let mut added = Vec::new();

        {
            let mut entities = self.entities.write();
            for (key, value) in &update.values {
                let Some(description) = self.description(key.descriptor()) else {
                    continue;
                };

                let entity_key = EntityKey {
                    key: description.key.to_string(),
                    device_id: update.address,
                };
                let state = EntityState {
                    entity_key: entity_key.clone(),
                    name: entity_name(&update.title, *key),
                    value: *value,
                    device_class: description.device_class,
                    unit: description.unit,
                    state_class: description.state_class,
                    entity_category: description.entity_category,
                    updated_at: update.updated_at,
                };

                if !entities.states.contains_key(&entity_key) {
                    added.push(NewEntity {
                        entity_key: entity_key.clone(),
                        name: state.name.clone(),
                        description,
                    });
                }
                entities.states.insert(entity_key, state.clone());
                states.push(state);
            }
            entities.devices.insert(update.address, update.device.clone());
        }

        let listeners = self.listeners.read();
        let entity_listeners: Vec<_> = listeners.entities.iter().map(|(_, l)| l.clone()).collect();
        let update_listeners: Vec<_> = listeners.updates.iter().map(|(_, l)| l.clone()).collect();
        drop(listeners);

        if !added.is_empty() {
            info!(
                "[Processor] {} processor added {} entit{} for {}",
                self.name,
                added.len(),
                if added.len() == 1 { "y" } else { "ies" },
                update.address
            );
            for listener in &entity_listeners {
                listener(added.as_slice());
            }
        }

        debug!(
            "[Processor] {} processor updated {} entit{} for {}",
            self.name,
            states.len(),
            if states.len() == 1 { "y" } else { "ies" },
            update.address
        );
        let processed = ProcessorUpdate {
            address: update.address,
            device: update.device.clone(),
            states,
        };
        for listener in &update_listeners {
            listener(&processed);
        }
    }

    pub fn entity_value(&self, key: &EntityKey) -> Option<f64> {
        self.entities.read().states.get(key).map(|s| s.value)
    }

    pub fn entity_state(&self, key: &EntityKey) -> Option<EntityState> {
        self.entities.read().states.get(key).cloned()
    }

    /// All current entity states, ordered by entity key.
    pub fn entity_states(&self) -> Vec<EntityState> {
        self.entities.read().states.values().cloned().collect()
    }

    pub fn device_info(&self, address: &DeviceAddress) -> Option<DeviceInfo> {
        self.entities.read().devices.get(address).cloned()
    }

    /// Listen for every processed update.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ProcessorUpdate) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().updates.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.updates.len();
        listeners.updates.retain(|(existing, _)| *existing != id);
        listeners.updates.len() != before
    }

    /// Listen for entities seen for the first time.
    ///
    /// Entities that already exist are replayed to the new listener.
    pub fn add_entities_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&[NewEntity]) + Send + Sync + 'static,
    {
        let existing: Vec<NewEntity> = self
            .entities
            .read()
            .states
            .values()
            .filter_map(|state| {
                let descriptor = MetricDescriptor::new(state.device_class, state.unit);
                let description = self.description(descriptor)?;
                Some(NewEntity {
                    entity_key: state.entity_key.clone(),
                    name: state.name.clone(),
                    description,
                })
            })
            .collect();
        if !existing.is_empty() {
            listener(existing.as_slice());
        }

        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().entities.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_entities_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.entities.len();
        listeners.entities.retain(|(existing, _)| *existing != id);
        listeners.entities.len() != before
    }
}

impl Publisher for PassiveDataProcessor {
    fn publish(&self, update: &MergedUpdate) {
        self.on_merged_update(update);
    }
}

fn entity_name(title: &str, key: MetricKey) -> String {
    format!("{} {}", title, key.display_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::AdvertisementEvent;
    use crate::device::parse_advertisement;
    use parking_lot::Mutex;

    fn address() -> DeviceAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn update(payload: &[u8], rssi: i16) -> MergedUpdate {
        let event = AdvertisementEvent::new(address(), rssi, payload.to_vec());
        MergedUpdate::merge(&parse_advertisement(&event).unwrap(), None)
    }

    fn weighed() -> MergedUpdate {
        // 7250 * 10 g, battery 90 %
        update(&[0x52, 0x50, 0x03, 0x52, 0x1C, 90], -60)
    }

    fn key(name: &str) -> EntityKey {
        EntityKey {
            key: name.to_string(),
            device_id: address(),
        }
    }

    #[test]
    fn test_sensor_processor_keeps_only_weight() {
        let processor = PassiveDataProcessor::sensors();
        processor.on_merged_update(&weighed());

        let states = processor.entity_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].entity_key, key("weight_g"));
        assert_eq!(states[0].name, "Renpho EEFF Weight");
        assert_eq!(processor.entity_value(&key("weight_g")), Some(72500.0));
        assert_eq!(processor.entity_value(&key("signal_strength_dBm")), None);
    }

    #[test]
    fn test_diagnostics_processor_keeps_signal_and_battery() {
        let processor = PassiveDataProcessor::diagnostics();
        processor.on_merged_update(&weighed());

        assert_eq!(processor.entity_value(&key("signal_strength_dBm")), Some(-60.0));
        assert_eq!(processor.entity_value(&key("battery_%")), Some(90.0));
        assert_eq!(processor.entity_value(&key("weight_g")), None);
        let battery = processor.entity_state(&key("battery_%")).unwrap();
        assert_eq!(battery.entity_category, Some(EntityCategory::Diagnostic));
        assert_eq!(
            processor.device_info(&address()).map(|d| d.name),
            Some("Renpho EEFF".to_string())
        );
    }

    #[test]
    fn test_values_persist_between_updates() {
        let processor = PassiveDataProcessor::sensors();
        processor.on_merged_update(&weighed());
        // Signal-only advertisement carries no weight
        processor.on_merged_update(&update(&[0x52, 0x50, 0x00], -70));
        assert_eq!(processor.entity_value(&key("weight_g")), Some(72500.0));
    }

    #[test]
    fn test_listeners_receive_updates_and_new_entities() {
        let processor = PassiveDataProcessor::diagnostics();
        let updates: Arc<Mutex<Vec<ProcessorUpdate>>> = Arc::default();
        let added: Arc<Mutex<Vec<EntityKey>>> = Arc::default();

        let sink = updates.clone();
        let update_id = processor.add_listener(move |u| sink.lock().push(u.clone()));
        let sink = added.clone();
        processor.add_entities_listener(move |new| {
            sink.lock().extend(new.iter().map(|e| e.entity_key.clone()))
        });

        processor.on_merged_update(&update(&[0x52, 0x50, 0x00], -70));
        processor.on_merged_update(&weighed());
        processor.on_merged_update(&weighed());

        assert_eq!(updates.lock().len(), 3);
        assert_eq!(updates.lock()[0].states.len(), 1);
        assert_eq!(
            *added.lock(),
            vec![key("signal_strength_dBm"), key("battery_%")]
        );

        assert!(processor.remove_listener(update_id));
        assert!(!processor.remove_listener(update_id));
        processor.on_merged_update(&weighed());
        assert_eq!(updates.lock().len(), 3);
    }

    #[test]
    fn test_late_entities_listener_gets_existing_entities() {
        let processor = PassiveDataProcessor::sensors();
        processor.on_merged_update(&weighed());

        let added: Arc<Mutex<Vec<NewEntity>>> = Arc::default();
        let sink = added.clone();
        let id = processor.add_entities_listener(move |new| sink.lock().extend_from_slice(new));

        let added = added.lock();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].description.key, "weight_g");
        assert!(processor.remove_entities_listener(id));
    }
}
