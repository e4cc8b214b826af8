//! Address-keyed collection of device coordinators.

use super::device_coordinator::{CoordinatorDeps, DeviceCoordinator, SubscriptionId};
use super::Publisher;
use crate::bluetooth::{AdvertisementEvent, DeviceAddress};
use crate::error::{BridgeError, Result};
use futures_util::future::join_all;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

const COMMAND_BUFFER: usize = 32;

/// Routes advertisements to the coordinator registered for their address.
pub struct CoordinatorRegistry {
    deps: CoordinatorDeps,
    coordinators: RwLock<HashMap<DeviceAddress, Arc<DeviceCoordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new(deps: CoordinatorDeps) -> Self {
        Self {
            deps,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn a coordinator for `address`. It stays idle until started.
    pub fn register(&self, address: DeviceAddress) -> Result<Arc<DeviceCoordinator>> {
        let mut coordinators = self.coordinators.write();
        if coordinators.contains_key(&address) {
            return Err(BridgeError::DeviceAlreadyRegistered(address.to_string()));
        }
        let coordinator = Arc::new(DeviceCoordinator::spawn(
            address,
            self.deps.clone(),
            COMMAND_BUFFER,
        ));
        coordinators.insert(address, coordinator.clone());
        info!("[Coordinator] Registered {}", address);
        Ok(coordinator)
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<Arc<DeviceCoordinator>> {
        self.coordinators.read().get(address).cloned()
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.coordinators.read().contains_key(address)
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self.coordinators.read().keys().copied().collect();
        addresses.sort();
        addresses
    }

    fn require(&self, address: &DeviceAddress) -> Result<Arc<DeviceCoordinator>> {
        self.get(address)
            .ok_or_else(|| BridgeError::DeviceNotRegistered(address.to_string()))
    }

    pub async fn subscribe(
        &self,
        address: &DeviceAddress,
        publisher: Arc<dyn Publisher>,
    ) -> Result<SubscriptionId> {
        self.require(address)?.subscribe(publisher).await
    }

    pub async fn unsubscribe(&self, address: &DeviceAddress, id: SubscriptionId) -> Result<bool> {
        self.require(address)?.unsubscribe(id).await
    }

    pub async fn start(&self, address: &DeviceAddress) -> Result<()> {
        self.require(address)?.start().await
    }

    /// Forward an advertisement to its coordinator.
    ///
    /// Returns `false` when no coordinator is registered for the address.
    pub async fn dispatch(&self, event: AdvertisementEvent) -> Result<bool> {
        let Some(coordinator) = self.get(&event.address) else {
            debug!("[Coordinator] No coordinator for {}, dropping advertisement", event.address);
            return Ok(false);
        };
        coordinator.handle_advertisement(event).await?;
        Ok(true)
    }

    /// Stop and remove the coordinator for `address`.
    pub async fn unload(&self, address: &DeviceAddress) -> Result<()> {
        let coordinator = self
            .coordinators
            .write()
            .remove(address)
            .ok_or_else(|| BridgeError::DeviceNotRegistered(address.to_string()))?;
        coordinator.stop().await;
        info!("[Coordinator] Unloaded {}", address);
        Ok(())
    }

    /// Stop every coordinator concurrently.
    pub async fn shutdown(&self) {
        let coordinators: Vec<_> = self.coordinators.write().drain().map(|(_, c)| c).collect();
        let count = coordinators.len();
        join_all(coordinators.iter().map(|c| c.stop())).await;
        info!("[Coordinator] Stopped {} coordinator(s)", count);
    }
}
