//! Coordinator for a single device address.
//!
//! A spawned worker task owns all mutable state for the device. Public
//! methods only enqueue commands, so the state machine
//! `Idle -> AwaitingAdvertisement -> [Polling] -> Publishing -> AwaitingAdvertisement`
//! advances strictly in the order commands were accepted.

use super::merge::MergedUpdate;
use super::policy::PollPolicy;
use super::poller::ActivePoller;
use super::state::{DeviceState, PollState};
use super::Publisher;
use crate::bluetooth::{AdvertisementEvent, DeviceAddress, DeviceHandle, RadioLink};
use crate::device::{DeviceSnapshot, parse_advertisement};
use crate::error::{BridgeError, PollError, Result};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type SubscriptionId = u64;

/// Capabilities injected into every coordinator.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub policy: Arc<dyn PollPolicy>,
    pub poller: Arc<dyn ActivePoller>,
    pub radio: Arc<dyn RadioLink>,
}

/// Read-only view of a coordinator, refreshed after every transition.
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub state: DeviceState,
    pub poll: PollState,
    pub subscribers: usize,
    pub last_update: Option<MergedUpdate>,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: DeviceState::Idle,
            poll: PollState::default(),
            subscribers: 0,
            last_update: None,
        }
    }
}

enum Command {
    Start,
    Advertisement(AdvertisementEvent),
    PollFinished {
        attempt: u64,
        result: std::result::Result<DeviceSnapshot, PollError>,
    },
    Subscribe {
        id: SubscriptionId,
        publisher: Arc<dyn Publisher>,
    },
    Unsubscribe {
        id: SubscriptionId,
        done: oneshot::Sender<bool>,
    },
}

/// Handle to the worker that coordinates one device.
pub struct DeviceCoordinator {
    address: DeviceAddress,
    commands: mpsc::Sender<Command>,
    status: Arc<RwLock<CoordinatorStatus>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl DeviceCoordinator {
    /// Spawn the worker for `address`. Must be called within a Tokio runtime.
    ///
    /// The coordinator starts `Idle`: subscribe first, then call
    /// [`DeviceCoordinator::start`].
    pub fn spawn(address: DeviceAddress, deps: CoordinatorDeps, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let status = Arc::new(RwLock::new(CoordinatorStatus::default()));
        let cancel = CancellationToken::new();

        let worker = Worker {
            address,
            deps,
            commands: tx.clone(),
            status: status.clone(),
            started: false,
            state: DeviceState::Idle,
            poll: PollState::default(),
            passive: None,
            active: None,
            subscribers: Vec::new(),
            last_update: None,
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));
        debug!("[Coordinator] Spawned coordinator for {}", address);

        Self {
            address,
            commands: tx,
            status,
            cancel,
            task: Mutex::new(Some(task)),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Begin accepting advertisements.
    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    /// Register a subscriber. If merged data already exists, the subscriber
    /// receives the latest update right away.
    pub async fn subscribe(&self, publisher: Arc<dyn Publisher>) -> Result<SubscriptionId> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.send(Command::Subscribe { id, publisher }).await?;
        Ok(id)
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        let (done, removed) = oneshot::channel();
        self.send(Command::Unsubscribe { id, done }).await?;
        removed
            .await
            .map_err(|_| BridgeError::CoordinatorStopped(self.address.to_string()))
    }

    /// Feed one advertisement into the state machine.
    pub async fn handle_advertisement(&self, event: AdvertisementEvent) -> Result<()> {
        if event.address != self.address {
            warn!(
                "[Coordinator] {} received advertisement for {}, ignoring",
                self.address, event.address
            );
            return Ok(());
        }
        self.send(Command::Advertisement(event)).await
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> DeviceState {
        self.status.read().state
    }

    pub fn last_update(&self) -> Option<MergedUpdate> {
        self.status.read().last_update.clone()
    }

    /// Tear down the device: drop its poll state and subscribers.
    ///
    /// An in-flight poll keeps running so its connection is released, but
    /// its result is discarded.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("[Coordinator] Worker for {} ended abnormally: {}", self.address, e);
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::CoordinatorStopped(self.address.to_string()));
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| BridgeError::CoordinatorStopped(self.address.to_string()))
    }
}

impl Drop for DeviceCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    address: DeviceAddress,
    deps: CoordinatorDeps,
    /// Used by poll tasks to report back through the same queue.
    commands: mpsc::Sender<Command>,
    status: Arc<RwLock<CoordinatorStatus>>,
    started: bool,
    state: DeviceState,
    poll: PollState,
    passive: Option<DeviceSnapshot>,
    active: Option<DeviceSnapshot>,
    subscribers: Vec<(SubscriptionId, Arc<dyn Publisher>)>,
    last_update: Option<MergedUpdate>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        self.teardown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.handle_start(),
            Command::Advertisement(event) => self.handle_advertisement(event),
            Command::PollFinished { attempt, result } => self.handle_poll_finished(attempt, result),
            Command::Subscribe { id, publisher } => self.handle_subscribe(id, publisher),
            Command::Unsubscribe { id, done } => {
                let removed = self.handle_unsubscribe(id);
                let _ = done.send(removed);
            }
        }
    }

    fn handle_start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!(
            "[Coordinator] Started {} with {} subscriber(s)",
            self.address,
            self.subscribers.len()
        );
        self.settle();
    }

    fn handle_subscribe(&mut self, id: SubscriptionId, publisher: Arc<dyn Publisher>) {
        if let Some(update) = &self.last_update {
            publisher.publish(update);
        }
        self.subscribers.push((id, publisher));
        debug!("[Coordinator] {} subscription {} added", self.address, id);
        self.settle();
    }

    fn handle_unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        let removed = self.subscribers.len() != before;
        if removed {
            debug!("[Coordinator] {} subscription {} removed", self.address, id);
        }
        self.settle();
        removed
    }

    fn handle_advertisement(&mut self, event: AdvertisementEvent) {
        if self.state == DeviceState::Idle {
            debug!(
                "[Coordinator] {} is idle (started={}, subscribers={}), dropping advertisement",
                self.address,
                self.started,
                self.subscribers.len()
            );
            return;
        }

        let snapshot = match parse_advertisement(&event) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("[Coordinator] {}: {}", self.address, e);
                return;
            }
        };
        self.passive = Some(snapshot);

        if self.poll.in_flight() {
            debug!("[Coordinator] {} poll in flight, publishing passive data", self.address);
            self.publish();
            return;
        }

        if self
            .deps
            .policy
            .should_poll(self.poll.last_poll_time(), event.received_at, true)
        {
            match self.connectable_handle(&event) {
                Some(handle) => {
                    self.begin_poll(handle);
                    return;
                }
                None => warn!(
                    "[Coordinator] {}",
                    PollError::NoReachableRadio(self.address.to_string())
                ),
            }
        }

        self.publish();
    }

    /// Trade a passive-only advertisement for a connectable handle.
    fn connectable_handle(&self, event: &AdvertisementEvent) -> Option<DeviceHandle> {
        DeviceHandle::from_advertisement(event)
            .or_else(|| self.deps.radio.connectable_device(&self.address))
    }

    fn begin_poll(&mut self, handle: DeviceHandle) {
        let attempt = self.poll.begin();
        self.set_state(DeviceState::Polling);
        info!(
            "[Poll] Polling {} via {} (attempt {})",
            self.address, handle.adapter, attempt
        );

        let poller = self.deps.poller.clone();
        let commands = self.commands.clone();
        let address = self.address;
        tokio::spawn(async move {
            let result = poller.poll(&handle).await;
            if commands
                .send(Command::PollFinished { attempt, result })
                .await
                .is_err()
            {
                debug!("[Poll] {} was stopped, discarding poll result", address);
            }
        });
    }

    fn handle_poll_finished(
        &mut self,
        attempt: u64,
        result: std::result::Result<DeviceSnapshot, PollError>,
    ) {
        if !self.poll.in_flight() || attempt != self.poll.attempt() {
            debug!(
                "[Poll] {} ignoring stale result of attempt {}",
                self.address, attempt
            );
            return;
        }

        let now = Instant::now();
        match result {
            Ok(snapshot) => {
                self.poll.succeed(now);
                info!(
                    "[Poll] {} poll succeeded with {} value(s)",
                    self.address,
                    snapshot.values().len()
                );
                self.active = Some(snapshot);
            }
            Err(e) => {
                self.poll.fail(now);
                match &e {
                    PollError::Timeout { .. } => warn!(
                        "[Poll] {} (failure {} in a row)",
                        e,
                        self.poll.consecutive_failures()
                    ),
                    _ => warn!(
                        "[Poll] Poll of {} failed: {} (failure {} in a row)",
                        self.address,
                        e,
                        self.poll.consecutive_failures()
                    ),
                }
            }
        }

        self.publish();
    }

    fn publish(&mut self) {
        let Some(passive) = &self.passive else {
            self.settle();
            return;
        };

        let update = MergedUpdate::merge(passive, self.active.as_ref());
        self.set_state(DeviceState::Publishing);
        for (_, subscriber) in &self.subscribers {
            subscriber.publish(&update);
        }
        debug!(
            "[Coordinator] {} published {} value(s) to {} subscriber(s)",
            self.address,
            update.values.len(),
            self.subscribers.len()
        );
        self.last_update = Some(update);
        self.settle();
    }

    /// Resting state after a transition.
    fn settle(&mut self) {
        let state = if !self.started || self.subscribers.is_empty() {
            DeviceState::Idle
        } else if self.poll.in_flight() {
            DeviceState::Polling
        } else {
            DeviceState::AwaitingAdvertisement
        };
        self.set_state(state);
    }

    fn set_state(&mut self, state: DeviceState) {
        self.state = state;
        let mut status = self.status.write();
        status.state = state;
        status.poll = self.poll.clone();
        status.subscribers = self.subscribers.len();
        status.last_update = self.last_update.clone();
    }

    fn teardown(&mut self) {
        self.subscribers.clear();
        self.passive = None;
        self.active = None;
        self.poll = PollState::default();
        self.last_update = None;
        self.set_state(DeviceState::Stopped);
        info!("[Coordinator] Stopped {}", self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::gatt::{BATTERY_LEVEL, WEIGHT_MEASUREMENT};
    use crate::coordinator::policy::IntervalPollPolicy;
    use crate::device::{MetricKey, PollReadout, parse_poll_result};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    const INTERVAL: Duration = Duration::from_secs(60);

    fn address() -> DeviceAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn advert(rssi: i16) -> AdvertisementEvent {
        AdvertisementEvent::new(address(), rssi, vec![0x52, 0x50, 0x00])
    }

    fn polled(grams: u32) -> DeviceSnapshot {
        let steps = ((grams / 5) as u16).to_le_bytes();
        let readout = PollReadout::new()
            .with(WEIGHT_MEASUREMENT, vec![0x00, steps[0], steps[1]])
            .with(BATTERY_LEVEL, vec![80]);
        parse_poll_result(&address(), &readout, Utc::now()).unwrap()
    }

    fn timeout_error() -> PollError {
        PollError::Timeout {
            address: address().to_string(),
            deadline: Duration::from_secs(20),
        }
    }

    /// Poller that replays scripted results, optionally waiting on a gate.
    #[derive(Default)]
    struct ScriptedPoller {
        results: Mutex<VecDeque<std::result::Result<DeviceSnapshot, PollError>>>,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        completed: AtomicUsize,
    }

    impl ScriptedPoller {
        fn new(results: Vec<std::result::Result<DeviceSnapshot, PollError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Default::default()
            }
        }

        fn gated(results: Vec<std::result::Result<DeviceSnapshot, PollError>>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(results)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActivePoller for ScriptedPoller {
        async fn poll(&self, device: &DeviceHandle) -> std::result::Result<DeviceSnapshot, PollError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
            self.results.lock().pop_front().unwrap_or_else(|| {
                Err(PollError::ConnectionFailed {
                    address: device.address.to_string(),
                    reason: "no scripted result".to_string(),
                })
            })
        }
    }

    struct StaticRadio(Option<DeviceHandle>);

    impl RadioLink for StaticRadio {
        fn connectable_device(&self, _address: &DeviceAddress) -> Option<DeviceHandle> {
            self.0.clone()
        }
    }

    struct NeverPoll;

    impl PollPolicy for NeverPoll {
        fn should_poll(&self, _: Option<Instant>, _: Instant, _: bool) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<MergedUpdate>>,
    }

    impl Recorder {
        fn updates(&self) -> Vec<MergedUpdate> {
            self.updates.lock().clone()
        }

        fn last(&self) -> MergedUpdate {
            self.updates.lock().last().cloned().expect("no update published")
        }
    }

    impl Publisher for Recorder {
        fn publish(&self, update: &MergedUpdate) {
            self.updates.lock().push(update.clone());
        }
    }

    fn deps(poller: Arc<ScriptedPoller>) -> CoordinatorDeps {
        CoordinatorDeps {
            policy: Arc::new(IntervalPollPolicy::new(INTERVAL)),
            poller,
            radio: Arc::new(StaticRadio(None)),
        }
    }

    async fn started(deps: CoordinatorDeps) -> (DeviceCoordinator, Arc<Recorder>) {
        let coordinator = DeviceCoordinator::spawn(address(), deps, 16);
        let recorder = Arc::new(Recorder::default());
        coordinator.subscribe(recorder.clone()).await.unwrap();
        coordinator.start().await.unwrap();
        settle().await;
        (coordinator, recorder)
    }

    /// Let the worker and any poll tasks drain their queues.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_polls_and_merges() {
        let poller = Arc::new(ScriptedPoller::new(vec![Ok(polled(72500))]));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;

        assert_eq!(poller.calls(), 1);
        let updates = recorder.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].value(MetricKey::MassGrams), Some(72500.0));
        assert_eq!(updates[0].value(MetricKey::SignalStrength), Some(-60.0));
        assert_eq!(updates[0].signal_strength, Some(-60));
        assert_eq!(coordinator.state(), DeviceState::AwaitingAdvertisement);
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertisement_within_interval_keeps_polled_values() {
        let poller = Arc::new(ScriptedPoller::new(vec![Ok(polled(72500))]));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        coordinator.handle_advertisement(advert(-55)).await.unwrap();
        settle().await;

        assert_eq!(poller.calls(), 1);
        let last = recorder.last();
        assert_eq!(last.value(MetricKey::SignalStrength), Some(-55.0));
        assert_eq!(last.value(MetricKey::MassGrams), Some(72500.0));
        assert_eq!(recorder.updates().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_publishes_passive_data() {
        let poller = Arc::new(ScriptedPoller::new(vec![Err(timeout_error())]));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;

        let last = recorder.last();
        assert_eq!(last.value(MetricKey::MassGrams), None);
        assert_eq!(last.value(MetricKey::SignalStrength), Some(-60.0));
        let status = coordinator.status();
        assert_eq!(status.poll.consecutive_failures(), 1);
        assert!(status.poll.last_success().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_stale_active_values() {
        let poller = Arc::new(ScriptedPoller::new(vec![Ok(polled(72500)), Err(timeout_error())]));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        tokio::time::advance(INTERVAL).await;
        coordinator.handle_advertisement(advert(-65)).await.unwrap();
        settle().await;

        assert_eq!(poller.calls(), 2);
        let last = recorder.last();
        assert_eq!(last.value(MetricKey::MassGrams), Some(72500.0));
        assert_eq!(last.value(MetricKey::BatteryPercent), Some(80.0));
        assert_eq!(last.value(MetricKey::SignalStrength), Some(-65.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_poll_waits_for_next_window() {
        let poller = Arc::new(ScriptedPoller::new(vec![
            Err(timeout_error()),
            Ok(polled(72500)),
        ]));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        coordinator.handle_advertisement(advert(-61)).await.unwrap();
        settle().await;
        assert_eq!(poller.calls(), 1);

        tokio::time::advance(INTERVAL).await;
        coordinator.handle_advertisement(advert(-62)).await.unwrap();
        settle().await;
        assert_eq!(poller.calls(), 2);
        assert_eq!(recorder.last().value(MetricKey::MassGrams), Some(72500.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_poll_in_flight() {
        let gate = Arc::new(Notify::new());
        let poller = Arc::new(ScriptedPoller::gated(vec![Ok(polled(72500))], gate.clone()));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        assert_eq!(coordinator.state(), DeviceState::Polling);

        for rssi in [-61, -62, -63] {
            tokio::time::advance(INTERVAL).await;
            coordinator.handle_advertisement(advert(rssi)).await.unwrap();
            settle().await;
        }
        assert_eq!(poller.calls(), 1);
        // Advertisements during the poll publish passive data only
        let updates = recorder.updates();
        assert_eq!(updates.len(), 3);
        assert!(updates.iter().all(|u| u.value(MetricKey::MassGrams).is_none()));

        gate.notify_one();
        settle().await;
        assert_eq!(poller.max_in_flight.load(Ordering::SeqCst), 1);
        let last = recorder.last();
        assert_eq!(recorder.updates().len(), 4);
        assert_eq!(last.value(MetricKey::MassGrams), Some(72500.0));
        // Freshest passive data at completion time
        assert_eq!(last.value(MetricKey::SignalStrength), Some(-63.0));
        assert_eq!(coordinator.state(), DeviceState::AwaitingAdvertisement);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_poll() {
        let gate = Arc::new(Notify::new());
        let poller = Arc::new(ScriptedPoller::gated(vec![Ok(polled(72500))], gate.clone()));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        coordinator.stop().await;
        assert_eq!(coordinator.state(), DeviceState::Stopped);

        gate.notify_one();
        settle().await;
        assert_eq!(poller.completed.load(Ordering::SeqCst), 1);
        assert!(recorder.updates().is_empty());
        assert!(matches!(
            coordinator.handle_advertisement(advert(-60)).await,
            Err(BridgeError::CoordinatorStopped(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribed_listener_gets_nothing_more() {
        let gate = Arc::new(Notify::new());
        let poller = Arc::new(ScriptedPoller::gated(vec![Ok(polled(72500))], gate.clone()));
        let coordinator = DeviceCoordinator::spawn(address(), deps(poller.clone()), 16);
        let leaving = Arc::new(Recorder::default());
        let staying = Arc::new(Recorder::default());
        let leaving_id = coordinator.subscribe(leaving.clone()).await.unwrap();
        coordinator.subscribe(staying.clone()).await.unwrap();
        coordinator.start().await.unwrap();

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        assert!(coordinator.unsubscribe(leaving_id).await.unwrap());
        assert!(!coordinator.unsubscribe(leaving_id).await.unwrap());

        gate.notify_one();
        settle().await;
        assert!(leaving.updates().is_empty());
        assert_eq!(staying.updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reachable_radio_skips_poll() {
        let poller = Arc::new(ScriptedPoller::new(vec![Ok(polled(72500))]));
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator
            .handle_advertisement(advert(-80).with_connectable(false))
            .await
            .unwrap();
        settle().await;

        assert_eq!(poller.calls(), 0);
        assert_eq!(recorder.last().value(MetricKey::SignalStrength), Some(-80.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_advertisement_uses_connectable_radio() {
        let poller = Arc::new(ScriptedPoller::new(vec![Ok(polled(72500))]));
        let deps = CoordinatorDeps {
            radio: Arc::new(StaticRadio(Some(DeviceHandle::new(address(), "hci1")))),
            ..deps(poller.clone())
        };
        let (coordinator, recorder) = started(deps).await;

        coordinator
            .handle_advertisement(advert(-80).with_connectable(false))
            .await
            .unwrap();
        settle().await;

        assert_eq!(poller.calls(), 1);
        assert_eq!(recorder.last().value(MetricKey::MassGrams), Some(72500.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_only_updates_mirror_latest_snapshot() {
        let poller = Arc::new(ScriptedPoller::default());
        let deps = CoordinatorDeps {
            policy: Arc::new(NeverPoll),
            ..deps(poller.clone())
        };
        let (coordinator, recorder) = started(deps).await;

        let payloads: [&[u8]; 3] = [
            &[0x52, 0x50, 0x00],
            &[0x52, 0x50, 0x03, 0x52, 0x1C, 55],
            &[0x52, 0x50, 0x02, 0x00, 0x00, 54],
        ];
        for (i, payload) in payloads.iter().enumerate() {
            let event = AdvertisementEvent::new(address(), -50 - i as i16, payload.to_vec());
            let expected = parse_advertisement(&event).unwrap();
            coordinator.handle_advertisement(event).await.unwrap();
            settle().await;
            assert_eq!(&recorder.last().values, expected.values());
        }
        assert_eq!(poller.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_advertisement_is_skipped() {
        let poller = Arc::new(ScriptedPoller::default());
        let (coordinator, recorder) = started(deps(poller.clone())).await;

        coordinator
            .handle_advertisement(AdvertisementEvent::new(address(), -60, vec![0x01]))
            .await
            .unwrap();
        settle().await;

        assert!(recorder.updates().is_empty());
        assert_eq!(poller.calls(), 0);
        assert_eq!(coordinator.state(), DeviceState::AwaitingAdvertisement);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_until_started_and_late_subscriber_catches_up() {
        let poller = Arc::new(ScriptedPoller::new(vec![Ok(polled(72500))]));
        let coordinator = DeviceCoordinator::spawn(address(), deps(poller.clone()), 16);
        let early = Arc::new(Recorder::default());
        coordinator.subscribe(early.clone()).await.unwrap();

        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        assert_eq!(coordinator.state(), DeviceState::Idle);
        assert!(early.updates().is_empty());

        coordinator.start().await.unwrap();
        coordinator.handle_advertisement(advert(-60)).await.unwrap();
        settle().await;
        assert_eq!(early.updates().len(), 1);

        let late = Arc::new(Recorder::default());
        coordinator.subscribe(late.clone()).await.unwrap();
        settle().await;
        assert_eq!(late.updates(), early.updates());
    }
}
