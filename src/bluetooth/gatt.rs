//! GATT client boundary used by the active poller.

use super::radio::DeviceHandle;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Expand a 16-bit SIG-assigned UUID onto the Bluetooth base UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

pub const WEIGHT_MEASUREMENT: Uuid = sig_uuid(0x2A9D);
pub const BATTERY_LEVEL: Uuid = sig_uuid(0x2A19);
pub const FIRMWARE_REVISION: Uuid = sig_uuid(0x2A26);
pub const HARDWARE_REVISION: Uuid = sig_uuid(0x2A27);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("read of {uuid} rejected: {reason}")]
    ReadRejected { uuid: Uuid, reason: String },
}

/// An established connection. Must be released with [`GattConnection::disconnect`].
#[async_trait]
pub trait GattConnection: Send + Sync {
    /// Characteristics exposed by the connected device.
    async fn characteristics(&self) -> Result<Vec<Uuid>, GattError>;

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, GattError>;

    async fn disconnect(&self) -> Result<(), GattError>;
}

/// Opens GATT connections on behalf of the poller.
#[async_trait]
pub trait GattConnector: Send + Sync {
    async fn connect(&self, device: &DeviceHandle) -> Result<Box<dyn GattConnection>, GattError>;
}
