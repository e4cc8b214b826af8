//! Active/passive update coordinator.
//!
//! One [`DeviceCoordinator`] per device address owns that device's poll
//! state and subscriber list. Advertisements, poll completions and
//! (un)subscriptions are serialized through its command channel, so no two
//! transitions for the same address ever run concurrently. Different
//! addresses run fully in parallel.

pub mod device_coordinator;
pub mod merge;
pub mod policy;
pub mod poller;
pub mod registry;
pub mod state;

pub use device_coordinator::{CoordinatorDeps, CoordinatorStatus, DeviceCoordinator, SubscriptionId};
pub use merge::MergedUpdate;
pub use policy::{IntervalPollPolicy, PollPolicy};
pub use poller::{ActivePoller, GattPoller};
pub use registry::CoordinatorRegistry;
pub use state::{DeviceState, PollState};

/// Outward sink for merged updates.
///
/// Called on the coordinator's own task; implementations must not block.
pub trait Publisher: Send + Sync {
    fn publish(&self, update: &MergedUpdate);
}

impl<F> Publisher for F
where
    F: Fn(&MergedUpdate) + Send + Sync,
{
    fn publish(&self, update: &MergedUpdate) {
        self(update)
    }
}
