use std::time::Duration;
use thiserror::Error as ThisError;

/// Failure of a single active poll.
///
/// Every variant is recoverable: the coordinator treats any of them as
/// "no active data this cycle" and keeps the last good values.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Poll of {address} timed out after {deadline:?}")]
    Timeout { address: String, deadline: Duration },

    #[error("No connectable radio has {0} in range")]
    NoReachableRadio(String),

    #[error("Malformed poll payload: {0}")]
    MalformedPayload(String),
}

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device already registered: {0}")]
    DeviceAlreadyRegistered(String),

    #[error("Device not registered: {0}")]
    DeviceNotRegistered(String),

    #[error("Coordinator for {0} is stopped")]
    CoordinatorStopped(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl From<BridgeError> for PollError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::MalformedPayload(msg) => PollError::MalformedPayload(msg),
            other => PollError::MalformedPayload(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
