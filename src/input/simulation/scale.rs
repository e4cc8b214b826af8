//! Simulated Renpho scales for running the bridge without a Bluetooth host.
//!
//! [`SimulatedRadio`] plays every host role at once: it produces
//! advertisements, resolves connectable handles and serves GATT reads from
//! the same per-scale state.

use crate::bluetooth::gatt::{BATTERY_LEVEL, FIRMWARE_REVISION, HARDWARE_REVISION, WEIGHT_MEASUREMENT};
use crate::bluetooth::{
    AdvertisementEvent, DeviceAddress, DeviceHandle, GattConnection, GattConnector, GattError, RadioLink,
};
use crate::device::parser::ADVERTISEMENT_PREFIX;
use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LOCAL_NAME: &str = "QN-Scale-001";
const FIRMWARE: &str = "1.3.2";
const HARDWARE: &str = "ES-CS20M";

#[derive(Debug, Clone, Copy, PartialEq)]
struct Reading {
    grams: f64,
    battery: u8,
    /// Someone is standing on the scale.
    occupied: bool,
}

/// One simulated scale.
pub struct SimulatedScale {
    address: DeviceAddress,
    reading: Mutex<Reading>,
    reachable: AtomicBool,
}

impl SimulatedScale {
    pub fn new(address: DeviceAddress, grams: f64, battery: u8) -> Self {
        Self {
            address,
            reading: Mutex::new(Reading {
                grams,
                battery: battery.min(100),
                occupied: false,
            }),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Out-of-range scales still advertise but refuse connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_weight(&self, grams: f64) {
        let mut reading = self.reading.lock();
        reading.grams = grams;
        reading.occupied = true;
    }

    /// Wander the reading a little, the way a real person steps on and off.
    fn drift(&self, rng: &mut impl Rng) {
        let mut reading = self.reading.lock();
        reading.occupied = rng.gen_bool(0.5);
        if reading.occupied {
            reading.grams = (reading.grams + rng.gen_range(-300.0..300.0)).clamp(20_000.0, 150_000.0);
        }
        if rng.gen_bool(0.05) {
            reading.battery = reading.battery.saturating_sub(1);
        }
    }

    fn advertisement_payload(&self) -> Vec<u8> {
        let reading = *self.reading.lock();
        let mut payload = ADVERTISEMENT_PREFIX.to_vec();
        let flags = if reading.occupied { 0x03 } else { 0x02 };
        payload.push(flags);
        let steps = (reading.grams / 10.0).round() as u16;
        payload.extend_from_slice(&steps.to_le_bytes());
        payload.push(reading.battery);
        payload
    }

    fn advertise(&self, adapter: &str, rng: &mut impl Rng) -> AdvertisementEvent {
        AdvertisementEvent::new(self.address, rng.gen_range(-90..-45), self.advertisement_payload())
            .with_local_name(LOCAL_NAME)
            .with_source(adapter)
            // Passive-only scanners report a share of the traffic
            .with_connectable(rng.gen_bool(0.8))
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Vec<u8>> {
        let reading = *self.reading.lock();
        match uuid {
            WEIGHT_MEASUREMENT => {
                // SI, 5 g resolution
                let steps = (reading.grams / 5.0).round() as u16;
                let [lo, hi] = steps.to_le_bytes();
                Some(vec![0x00, lo, hi])
            }
            BATTERY_LEVEL => Some(vec![reading.battery]),
            FIRMWARE_REVISION => Some(FIRMWARE.as_bytes().to_vec()),
            HARDWARE_REVISION => Some(HARDWARE.as_bytes().to_vec()),
            _ => None,
        }
    }
}

/// Host radio and GATT client backed by simulated scales.
pub struct SimulatedRadio {
    adapter: String,
    scales: BTreeMap<DeviceAddress, Arc<SimulatedScale>>,
    connect_delay: Duration,
}

impl SimulatedRadio {
    pub fn new(adapter: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            scales: BTreeMap::new(),
            connect_delay: Duration::from_millis(250),
        }
    }

    pub fn with_scale(mut self, scale: SimulatedScale) -> Self {
        self.scales.insert(scale.address(), Arc::new(scale));
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn scale(&self, address: &DeviceAddress) -> Option<Arc<SimulatedScale>> {
        self.scales.get(address).cloned()
    }

    pub fn addresses(&self) -> Vec<DeviceAddress> {
        self.scales.keys().copied().collect()
    }
}

impl RadioLink for SimulatedRadio {
    fn connectable_device(&self, address: &DeviceAddress) -> Option<DeviceHandle> {
        self.scales
            .get(address)
            .filter(|scale| scale.reachable.load(Ordering::SeqCst))
            .map(|_| DeviceHandle::new(*address, self.adapter.clone()))
    }
}

#[async_trait]
impl GattConnector for SimulatedRadio {
    async fn connect(&self, device: &DeviceHandle) -> Result<Box<dyn GattConnection>, GattError> {
        let scale = self
            .scales
            .get(&device.address)
            .cloned()
            .ok_or_else(|| GattError::ConnectFailed(format!("unknown device {}", device.address)))?;

        tokio::time::sleep(self.connect_delay).await;
        if !scale.reachable.load(Ordering::SeqCst) {
            return Err(GattError::ConnectFailed(format!("{} is out of range", device.address)));
        }
        debug!("[Sim] Connected to {}", device.address);
        Ok(Box::new(SimulatedConnection { scale }))
    }
}

struct SimulatedConnection {
    scale: Arc<SimulatedScale>,
}

#[async_trait]
impl GattConnection for SimulatedConnection {
    async fn characteristics(&self) -> Result<Vec<Uuid>, GattError> {
        Ok(vec![WEIGHT_MEASUREMENT, BATTERY_LEVEL, FIRMWARE_REVISION, HARDWARE_REVISION])
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, GattError> {
        if !self.scale.reachable.load(Ordering::SeqCst) {
            return Err(GattError::Disconnected);
        }
        self.scale.characteristic(uuid).ok_or_else(|| GattError::ReadRejected {
            uuid,
            reason: "not supported".to_string(),
        })
    }

    async fn disconnect(&self) -> Result<(), GattError> {
        debug!("[Sim] Disconnected from {}", self.scale.address());
        Ok(())
    }
}

/// Spawn a task that emits one advertisement per scale every `period`.
pub fn run_advertiser(
    radio: Arc<SimulatedRadio>,
    period: Duration,
    events: mpsc::Sender<AdvertisementEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "[Sim] Advertising {} scale(s) every {:?}",
            radio.scales.len(),
            period
        );
        let mut rng = StdRng::from_entropy();
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for scale in radio.scales.values() {
                scale.drift(&mut rng);
                let event = scale.advertise(&radio.adapter, &mut rng);
                if events.send(event).await.is_err() {
                    info!("[Sim] Advertisement channel closed, stopping");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MetricKey, PollReadout, parse_advertisement, parse_poll_result};
    use chrono::Utc;

    fn address() -> DeviceAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    fn radio() -> SimulatedRadio {
        SimulatedRadio::new("sim0")
            .with_scale(SimulatedScale::new(address(), 72_500.0, 88))
            .with_connect_delay(Duration::ZERO)
    }

    #[test]
    fn test_advertisement_payload_decodes() {
        let scale = SimulatedScale::new(address(), 72_500.0, 88);
        scale.set_weight(80_000.0);
        let mut rng = StdRng::seed_from_u64(7);
        let snapshot = parse_advertisement(&scale.advertise("sim0", &mut rng)).unwrap();
        assert_eq!(snapshot.value(MetricKey::MassGrams), Some(80_000.0));
        assert_eq!(snapshot.value(MetricKey::BatteryPercent), Some(88.0));
    }

    #[tokio::test]
    async fn test_gatt_readout_decodes() {
        let radio = radio();
        let handle = radio.connectable_device(&address()).unwrap();
        let connection = radio.connect(&handle).await.unwrap();

        let mut readout = PollReadout::new();
        for uuid in connection.characteristics().await.unwrap() {
            readout.insert(uuid, connection.read(uuid).await.unwrap());
        }
        let snapshot = parse_poll_result(&address(), &readout, Utc::now()).unwrap();
        assert_eq!(snapshot.value(MetricKey::MassGrams), Some(72_500.0));
        assert_eq!(snapshot.info().hw_version.as_deref(), Some(HARDWARE));
    }

    #[tokio::test]
    async fn test_unreachable_scale_has_no_handle() {
        let radio = radio();
        radio.scale(&address()).unwrap().set_reachable(false);
        assert!(radio.connectable_device(&address()).is_none());
        let handle = DeviceHandle::new(address(), "sim0");
        assert!(radio.connect(&handle).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advertiser_emits_until_cancelled() {
        let radio = Arc::new(radio());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = run_advertiser(radio, Duration::from_secs(1), tx, cancel.clone());

        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.address, address());
            assert_eq!(event.local_name.as_deref(), Some(LOCAL_NAME));
        }
        cancel.cancel();
        task.await.unwrap();
    }
}
