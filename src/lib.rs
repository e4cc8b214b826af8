//! Renpho BLE bridge library.
//!
//! Coordinates passive advertisements and active GATT polls for Renpho
//! scales and turns the merged stream into display-ready entity states.

pub mod bluetooth;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod input;
pub mod integration;
pub mod output;
pub mod processor;
