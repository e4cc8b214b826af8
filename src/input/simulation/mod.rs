//! Simulated Bluetooth host for development and testing.

mod scale;

pub use scale::{SimulatedRadio, SimulatedScale, run_advertiser};
