//! Scale integration orchestrator.
//!
//! Wires the advertisement stream, device discovery, the coordinator
//! registry, per-device processors and the optional MQTT sink, keeping
//! those internals out of main.rs.

use crate::bluetooth::{AdvertisementEvent, DeviceAddress};
use crate::coordinator::{CoordinatorDeps, CoordinatorRegistry, SubscriptionId};
use crate::device::{DeviceDiscovery, DiscoveredDevice};
use crate::error::{BridgeError, Result};
use crate::output::MqttSink;
use crate::processor::PassiveDataProcessor;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Processors attached to one device.
#[derive(Clone)]
pub struct DeviceProcessors {
    pub sensors: Arc<PassiveDataProcessor>,
    pub diagnostics: Arc<PassiveDataProcessor>,
}

struct DeviceEntry {
    processors: DeviceProcessors,
    subscriptions: Vec<SubscriptionId>,
}

pub struct ScaleIntegration {
    registry: CoordinatorRegistry,
    discovery: Mutex<DeviceDiscovery>,
    auto_discover: bool,
    devices: RwLock<HashMap<DeviceAddress, DeviceEntry>>,
    sink: Option<MqttSink>,
}

impl ScaleIntegration {
    pub fn new(deps: CoordinatorDeps, auto_discover: bool) -> Self {
        Self {
            registry: CoordinatorRegistry::new(deps),
            discovery: Mutex::new(DeviceDiscovery::default()),
            auto_discover,
            devices: RwLock::new(HashMap::new()),
            sink: None,
        }
    }

    /// Forward every processor's updates to MQTT.
    pub fn with_sink(mut self, sink: MqttSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &CoordinatorRegistry {
        &self.registry
    }

    /// Register, subscribe and start a coordinator for `address`.
    pub async fn add_device(&self, address: DeviceAddress) -> Result<DeviceProcessors> {
        self.registry.register(address)?;
        self.activate(address).await
    }

    /// Attach processors to a registered coordinator and start it. On
    /// failure the coordinator is unloaded again.
    async fn activate(&self, address: DeviceAddress) -> Result<DeviceProcessors> {
        let processors = DeviceProcessors {
            sensors: Arc::new(PassiveDataProcessor::sensors()),
            diagnostics: Arc::new(PassiveDataProcessor::diagnostics()),
        };
        let subscriptions = match self.subscribe_and_start(&address, &processors).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!("[BLE] Failed to start scale {}: {}", address, e);
                if let Err(unload) = self.registry.unload(&address).await {
                    warn!("[BLE] Failed to unload {}: {}", address, unload);
                }
                return Err(e);
            }
        };

        if let Some(sink) = &self.sink {
            sink.attach(&processors.sensors);
            sink.attach(&processors.diagnostics);
        }
        self.discovery.lock().mark_configured(address);
        self.devices.write().insert(
            address,
            DeviceEntry {
                processors: processors.clone(),
                subscriptions,
            },
        );
        info!("[BLE] Added scale {}", address);
        Ok(processors)
    }

    async fn subscribe_and_start(
        &self,
        address: &DeviceAddress,
        processors: &DeviceProcessors,
    ) -> Result<Vec<SubscriptionId>> {
        let subscriptions = vec![
            self.registry.subscribe(address, processors.sensors.clone()).await?,
            self.registry.subscribe(address, processors.diagnostics.clone()).await?,
        ];
        self.registry.start(address).await?;
        Ok(subscriptions)
    }

    /// Unsubscribe the processors and tear the coordinator down.
    pub async fn remove_device(&self, address: &DeviceAddress) -> Result<()> {
        let entry = self
            .devices
            .write()
            .remove(address)
            .ok_or_else(|| BridgeError::DeviceNotRegistered(address.to_string()))?;
        for id in entry.subscriptions {
            self.registry.unsubscribe(address, id).await?;
        }
        self.registry.unload(address).await?;
        self.discovery.lock().forget(address);
        info!("[BLE] Removed scale {}", address);
        Ok(())
    }

    pub fn processors(&self, address: &DeviceAddress) -> Option<DeviceProcessors> {
        self.devices.read().get(address).map(|e| e.processors.clone())
    }

    pub fn devices(&self) -> Vec<DeviceAddress> {
        self.registry.addresses()
    }

    /// Supported scales seen but not added.
    pub fn discovered(&self) -> Vec<DiscoveredDevice> {
        self.discovery.lock().discovered()
    }

    pub async fn handle_advertisement(&self, event: AdvertisementEvent) -> Result<()> {
        if !self.registry.contains(&event.address) {
            let found = self.discovery.lock().observe(&event);
            let Some(found) = found else {
                debug!("[BLE] Ignoring advertisement from {}", event.address);
                return Ok(());
            };
            if !self.auto_discover {
                return Ok(());
            }
            self.add_device(found.address).await?;
        }
        self.registry.dispatch(event).await?;
        Ok(())
    }

    /// Consume advertisements until the channel closes or `cancel` fires.
    pub fn start(
        self: Arc<Self>,
        mut events: mpsc::Receiver<AdvertisementEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[BLE] Integration started with {} scale(s), auto-discover {}",
                self.devices().len(),
                if self.auto_discover { "on" } else { "off" }
            );
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let address = event.address;
                if let Err(e) = self.handle_advertisement(event).await {
                    warn!("[BLE] Advertisement from {} not handled: {}", address, e);
                }
            }
            self.shutdown().await;
        })
    }

    pub async fn shutdown(&self) {
        self.devices.write().clear();
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{DeviceHandle, RadioLink};
    use crate::coordinator::{ActivePoller, IntervalPollPolicy};
    use crate::device::{DeviceSnapshot, PollReadout, parse_poll_result};
    use crate::bluetooth::gatt::WEIGHT_MEASUREMENT;
    use crate::error::PollError;
    use crate::processor::EntityKey;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct FixedPoller;

    #[async_trait]
    impl ActivePoller for FixedPoller {
        async fn poll(&self, device: &DeviceHandle) -> std::result::Result<DeviceSnapshot, PollError> {
            // 15000 * 5 g
            let readout = PollReadout::new().with(WEIGHT_MEASUREMENT, vec![0x00, 0x98, 0x3A]);
            parse_poll_result(&device.address, &readout, Utc::now()).map_err(PollError::from)
        }
    }

    struct NoRadio;

    impl RadioLink for NoRadio {
        fn connectable_device(&self, _address: &DeviceAddress) -> Option<DeviceHandle> {
            None
        }
    }

    fn integration(auto_discover: bool) -> ScaleIntegration {
        ScaleIntegration::new(
            CoordinatorDeps {
                policy: Arc::new(IntervalPollPolicy::new(Duration::from_secs(60))),
                poller: Arc::new(FixedPoller),
                radio: Arc::new(NoRadio),
            },
            auto_discover,
        )
    }

    fn address() -> DeviceAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn advert() -> AdvertisementEvent {
        AdvertisementEvent::new(address(), -58, vec![0x52, 0x50, 0x02, 0x00, 0x00, 91])
            .with_local_name("QN-Scale-001")
    }

    fn key(name: &str) -> EntityKey {
        EntityKey {
            key: name.to_string(),
            device_id: address(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_device_feeds_both_processors() {
        let integration = integration(false);
        let processors = integration.add_device(address()).await.unwrap();

        integration.handle_advertisement(advert()).await.unwrap();
        settle().await;

        assert_eq!(processors.sensors.entity_value(&key("weight_g")), Some(75_000.0));
        assert_eq!(processors.diagnostics.entity_value(&key("battery_%")), Some(91.0));
        assert_eq!(
            processors.diagnostics.entity_value(&key("signal_strength_dBm")),
            Some(-58.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_without_auto_add() {
        let integration = integration(false);
        integration.handle_advertisement(advert()).await.unwrap();

        assert!(integration.devices().is_empty());
        let discovered = integration.discovered();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].title, "Renpho EEFF");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_discover_adds_device() {
        let integration = integration(true);
        integration.handle_advertisement(advert()).await.unwrap();
        settle().await;

        assert_eq!(integration.devices(), vec![address()]);
        assert!(integration.discovered().is_empty());
        let processors = integration.processors(&address()).unwrap();
        assert_eq!(processors.sensors.entity_value(&key("weight_g")), Some(75_000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_device_is_ignored() {
        let integration = integration(true);
        let event = AdvertisementEvent::new(address(), -58, vec![0x52, 0x50, 0x00]);
        integration.handle_advertisement(event).await.unwrap();
        assert!(integration.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_device() {
        let integration = integration(false);
        integration.add_device(address()).await.unwrap();
        integration.remove_device(&address()).await.unwrap();

        assert!(integration.devices().is_empty());
        assert!(integration.processors(&address()).is_none());
        assert!(matches!(
            integration.remove_device(&address()).await,
            Err(BridgeError::DeviceNotRegistered(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_unloads_coordinator() {
        let integration = integration(false);
        let coordinator = integration.registry().register(address()).unwrap();
        coordinator.stop().await;

        assert!(matches!(
            integration.activate(address()).await,
            Err(BridgeError::CoordinatorStopped(_))
        ));
        assert!(!integration.registry().contains(&address()));
        assert!(integration.processors(&address()).is_none());

        // The address can be added again afterwards
        integration.add_device(address()).await.unwrap();
        assert_eq!(integration.devices(), vec![address()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_stops_on_cancel() {
        let integration = Arc::new(integration(false));
        integration.add_device(address()).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = integration.clone().start(rx, cancel.clone());

        tx.send(advert()).await.unwrap();
        settle().await;
        assert!(integration.processors(&address()).is_some());

        cancel.cancel();
        task.await.unwrap();
        assert!(integration.devices().is_empty());
    }
}
