//! Boundary types for the host Bluetooth stack.
//!
//! The scanner, the radio adapters and the GATT client belong to the host.
//! This module only fixes the shapes the coordinator consumes from them:
//! advertisement events, connectable device handles and GATT connections.

pub mod address;
pub mod advertisement;
pub mod gatt;
pub mod radio;

pub use address::DeviceAddress;
pub use advertisement::AdvertisementEvent;
pub use gatt::{GattConnection, GattConnector, GattError};
pub use radio::{DeviceHandle, RadioLink};
