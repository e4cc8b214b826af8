//! Advertisement sources for the bridge.
//!
//! Current input sources:
//! - `simulation`: simulated scales standing in for the host Bluetooth stack

pub mod simulation;
