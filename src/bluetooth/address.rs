//! Bluetooth device address (`AA:BB:CC:DD:EE:FF`).

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalised 48-bit device address.
///
/// Accepts `:` or `-` separators in any case and always renders as
/// upper-case colon form, so the same radio yields the same key regardless
/// of which adapter reported it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Last two octets without separator, e.g. `"EEFF"`.
    pub fn short_address(&self) -> String {
        format!("{:02X}{:02X}", self.0[4], self.0[5])
    }
}

impl FromStr for DeviceAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', ":");
        let parts: Vec<&str> = normalized.split(':').collect();
        if parts.len() != 6 {
            return Err(BridgeError::InvalidAddress(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(BridgeError::InvalidAddress(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| BridgeError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(address: DeviceAddress) -> Self {
        address.to_string()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}
