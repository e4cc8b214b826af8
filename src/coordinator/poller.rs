//! Active GATT polling with a hard deadline and guaranteed disconnect.

use crate::bluetooth::gatt::{BATTERY_LEVEL, FIRMWARE_REVISION, HARDWARE_REVISION, WEIGHT_MEASUREMENT};
use crate::bluetooth::{DeviceAddress, DeviceHandle, GattConnection, GattConnector, GattError};
use crate::device::{DeviceSnapshot, PollReadout, parse_poll_result};
use crate::error::PollError;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use uuid::Uuid;

/// Characteristics read on every poll, in read order.
const POLLED_CHARACTERISTICS: [Uuid; 4] = [
    WEIGHT_MEASUREMENT,
    BATTERY_LEVEL,
    FIRMWARE_REVISION,
    HARDWARE_REVISION,
];

/// Connect, read and disconnect once.
///
/// At most one call per device is in flight at a time; the coordinator
/// enforces that, not the poller.
#[async_trait]
pub trait ActivePoller: Send + Sync {
    async fn poll(&self, device: &DeviceHandle) -> Result<DeviceSnapshot, PollError>;
}

/// [`ActivePoller`] over a host GATT client.
pub struct GattPoller {
    connector: Arc<dyn GattConnector>,
    deadline: Duration,
    disconnect_grace: Duration,
}

impl GattPoller {
    /// `deadline` bounds connect + read; `disconnect_grace` bounds the
    /// release that follows, whatever the outcome.
    pub fn new(connector: Arc<dyn GattConnector>, deadline: Duration, disconnect_grace: Duration) -> Self {
        Self {
            connector,
            deadline,
            disconnect_grace,
        }
    }

    fn timeout_error(&self, address: &DeviceAddress) -> PollError {
        PollError::Timeout {
            address: address.to_string(),
            deadline: self.deadline,
        }
    }

    fn connection_error(address: &DeviceAddress, err: GattError) -> PollError {
        PollError::ConnectionFailed {
            address: address.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl ActivePoller for GattPoller {
    async fn poll(&self, device: &DeviceHandle) -> Result<DeviceSnapshot, PollError> {
        let address = device.address;
        let deadline = Instant::now() + self.deadline;

        debug!("[Poll] Connecting to {} via {}", address, device.adapter);
        let connection = match timeout_at(deadline, self.connector.connect(device)).await {
            Ok(Ok(connection)) => ConnectionGuard::new(address, connection, self.disconnect_grace),
            Ok(Err(e)) => return Err(Self::connection_error(&address, e)),
            Err(_) => return Err(self.timeout_error(&address)),
        };

        let outcome = timeout_at(deadline, read_characteristics(connection.get(), &address)).await;
        connection.release().await;

        let readout = match outcome {
            Ok(Ok(readout)) => readout,
            Ok(Err(e)) => return Err(Self::connection_error(&address, e)),
            Err(_) => return Err(self.timeout_error(&address)),
        };

        info!(
            "[Poll] Read {} characteristic(s) from {}",
            readout.len(),
            address
        );
        parse_poll_result(&address, &readout, Utc::now()).map_err(PollError::from)
    }
}

async fn read_characteristics(
    connection: &dyn GattConnection,
    address: &DeviceAddress,
) -> Result<PollReadout, GattError> {
    let available = connection.characteristics().await?;
    for uuid in &available {
        debug!("[Poll] {} exposes characteristic {}", address, uuid);
    }

    let mut readout = PollReadout::new();
    for uuid in POLLED_CHARACTERISTICS {
        if !available.contains(&uuid) {
            continue;
        }
        match connection.read(uuid).await {
            Ok(value) => readout.insert(uuid, value),
            Err(e @ GattError::ReadRejected { .. }) => {
                debug!("[Poll] {} skipped: {}", address, e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(readout)
}

/// Owns a live connection until it is released.
///
/// [`ConnectionGuard::release`] disconnects within the grace period. If the
/// guard is dropped without release (the poll future was cancelled), the
/// disconnect is handed to a background task instead.
struct ConnectionGuard {
    address: DeviceAddress,
    connection: Option<Box<dyn GattConnection>>,
    grace: Duration,
}

impl ConnectionGuard {
    fn new(address: DeviceAddress, connection: Box<dyn GattConnection>, grace: Duration) -> Self {
        Self {
            address,
            connection: Some(connection),
            grace,
        }
    }

    fn get(&self) -> &dyn GattConnection {
        match &self.connection {
            Some(connection) => connection.as_ref(),
            None => unreachable!("connection is only taken on release or drop"),
        }
    }

    async fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            disconnect(self.address, connection, self.grace).await;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let (address, grace) = (self.address, self.grace);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(disconnect(address, connection, grace));
            }
            Err(_) => warn!("[Poll] No runtime to release connection to {}", address),
        }
    }
}

async fn disconnect(address: DeviceAddress, connection: Box<dyn GattConnection>, grace: Duration) {
    match timeout(grace, connection.disconnect()).await {
        Ok(Ok(())) => debug!("[Poll] Disconnected from {}", address),
        Ok(Err(e)) => warn!("[Poll] Disconnect from {} failed: {}", address, e),
        Err(_) => warn!(
            "[Poll] Disconnect from {} did not finish within {:?}, dropping connection",
            address, grace
        ),
    }
}
